//! Pure compare-and-swap helpers.
//!
//! Version preconditions shared by every store backend, and the retry
//! schedule used by the coordinator.

use std::time::Duration;

/// Check whether a conditional write may proceed.
///
/// `expected == None` means "the object must not exist yet"; otherwise the
/// stored generation must equal the expected one.
///
/// # Example
///
/// ```ignore
/// assert!(is_precondition_met(None, None));
/// assert!(is_precondition_met(Some(3), Some(3)));
/// assert!(!is_precondition_met(Some(3), None));
/// ```
#[inline]
pub fn is_precondition_met(current: Option<u64>, expected: Option<u64>) -> bool {
    current == expected
}

/// Generation to assign on a successful write.
///
/// # Tiger Style
///
/// - Uses saturating_add to prevent overflow
#[inline]
pub fn next_generation(current: Option<u64>) -> u64 {
    current.map_or(1, |generation| generation.saturating_add(1))
}

/// Check whether another attempt fits in the budget.
///
/// # Arguments
///
/// * `attempts_made` - Attempts already made, including the one that just failed
/// * `max_attempts` - Total attempt budget
#[inline]
pub fn should_retry(attempts_made: u32, max_attempts: u32) -> bool {
    attempts_made < max_attempts
}

/// Sleep before the next attempt: `2 * attempts_made` backoff units.
///
/// # Tiger Style
///
/// - Uses saturating arithmetic so huge units clamp instead of panicking
#[inline]
pub fn compute_retry_delay(attempts_made: u32, backoff_unit: Duration) -> Duration {
    backoff_unit.saturating_mul(attempts_made.saturating_mul(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition() {
        assert!(is_precondition_met(None, None));
        assert!(is_precondition_met(Some(7), Some(7)));
        assert!(!is_precondition_met(Some(7), None));
        assert!(!is_precondition_met(None, Some(7)));
        assert!(!is_precondition_met(Some(8), Some(7)));
    }

    #[test]
    fn test_next_generation() {
        assert_eq!(next_generation(None), 1);
        assert_eq!(next_generation(Some(1)), 2);
        assert_eq!(next_generation(Some(u64::MAX)), u64::MAX);
    }

    #[test]
    fn test_should_retry() {
        assert!(should_retry(1, 4));
        assert!(should_retry(3, 4));
        assert!(!should_retry(4, 4));
        assert!(!should_retry(1, 1));
    }

    #[test]
    fn test_retry_delay_grows_linearly() {
        let unit = Duration::from_secs(1);
        assert_eq!(compute_retry_delay(1, unit), Duration::from_secs(2));
        assert_eq!(compute_retry_delay(2, unit), Duration::from_secs(4));
        assert_eq!(compute_retry_delay(3, unit), Duration::from_secs(6));
        assert_eq!(compute_retry_delay(3, Duration::ZERO), Duration::ZERO);
        assert_eq!(compute_retry_delay(u32::MAX, Duration::MAX), Duration::MAX);
    }
}
