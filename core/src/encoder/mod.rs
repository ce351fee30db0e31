pub mod driver;
pub mod params;

pub use driver::{EncodeStats, EncodeStatus, EncoderDriver, MetricRequest};
pub use params::{Backend, EncoderParams, RateDistribution};
