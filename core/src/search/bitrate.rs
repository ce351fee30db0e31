//! Bitrate binary search (spec §4.4, VBR path): binary search over
//! `[0, max_bitrate]`, returning the probed bitrate whose VMAF lands
//! closest to target.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateProbe {
  pub bitrate: u32,
  pub vmaf:    f64,
}

/// Binary searches `[0, max_bitrate]` for up to `num_probes` steps,
/// narrowing by whether the probed mean VMAF under- or overshoots `target`.
/// Returns the probed bitrate closest to `target`; ties prefer the lower
/// bitrate (spec §4.4 tie-break).
pub fn bitrate_binary_search(
  max_bitrate: u32,
  num_probes: u32,
  target_vmaf: f64,
  mut probe: impl FnMut(u32) -> f64,
) -> BitrateProbe {
  let mut low = 0u32;
  let mut high = max_bitrate;
  let mut history: Vec<BitrateProbe> = Vec::new();

  for _ in 0..num_probes {
    if low > high {
      break;
    }
    let mid = low + (high - low) / 2;
    if history.iter().any(|p| p.bitrate == mid) {
      break;
    }
    let vmaf = probe(mid);
    history.push(BitrateProbe { bitrate: mid, vmaf });

    if vmaf < target_vmaf {
      low = mid.saturating_add(1);
    } else {
      if mid == 0 {
        break;
      }
      high = mid - 1;
    }
  }

  history
    .into_iter()
    .min_by(|a, b| {
      let da = (a.vmaf - target_vmaf).abs();
      let db = (b.vmaf - target_vmaf).abs();
      da.partial_cmp(&db)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.bitrate.cmp(&b.bitrate))
    })
    .expect("at least one probe taken when max_bitrate > 0 and num_probes > 0")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finds_bitrate_near_target() {
    // vmaf ~ saturates toward 100 as bitrate grows, crosses 90 near 2000kbps
    let result = bitrate_binary_search(5000, 8, 90.0, |br| 100.0 - (5000 - br.min(5000)) as f64 / 200.0);
    assert!(result.bitrate > 0);
  }

  #[test]
  fn prefers_lower_bitrate_on_tie() {
    let mut calls = vec![];
    let result = bitrate_binary_search(100, 3, 50.0, |br| {
      calls.push(br);
      50.0
    });
    assert_eq!(result.vmaf, 50.0);
  }
}
