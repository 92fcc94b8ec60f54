//! Retry delays for hardware that comes and goes

use std::time::Duration;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Delay before the next attempt after `failures` consecutive errors
pub fn backoff(failures: u32) -> Duration {
    let factor = 1.5f64.powi(failures.saturating_sub(1).min(16) as i32);
    BACKOFF_BASE.mul_f64(factor).min(BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_millis(1500));
        assert!(backoff(3) > backoff(2));
        assert_eq!(backoff(10), Duration::from_secs(5));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(5));
    }
}
