use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in seconds. Every deadline in this crate uses this unit.
pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_secs() as i64)
    .unwrap_or_default()
}

/// Whole seconds of `duration`, saturating at `i64::MAX`.
pub fn secs(duration: Duration) -> i64 {
  i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_secs_saturates() {
    assert_eq!(secs(Duration::from_secs(1800)), 1800);
    assert_eq!(secs(Duration::MAX), i64::MAX);
  }
}
