//! Retry delay after consecutive failures.
//!
//! The delay doubles with every failure, starting at one minute and capped at
//! one day: 60, 120, 240, ... 61440, 86400, 86400, ...

/// Delay after the first failure, in seconds.
pub const BASE_DELAY_SECS: u64 = 60;

/// Upper bound for the delay, in seconds.
pub const MAX_DELAY_SECS: u64 = 86_400;

/// Seconds to wait after the `failure_count`-th consecutive failure.
///
/// A count of 0 is treated as 1.
pub fn compute_delay(failure_count: u32) -> u64 {
    let exponent = failure_count.saturating_sub(1);
    2u64.checked_pow(exponent)
        .and_then(|factor| factor.checked_mul(BASE_DELAY_SECS))
        .map_or(MAX_DELAY_SECS, |delay| delay.min(MAX_DELAY_SECS))
}

/// Whether enough time has passed since the last failure to try again.
pub fn should_retry_now(last_failure_epoch: i64, failure_count: u32, now_epoch: i64) -> bool {
    let elapsed = now_epoch.saturating_sub(last_failure_epoch);
    elapsed >= 0 && elapsed as u64 >= compute_delay(failure_count)
}

/// Epoch second at which a retry becomes allowed.
pub fn retry_at(last_failure_epoch: i64, failure_count: u32) -> i64 {
    let delay = i64::try_from(compute_delay(failure_count)).unwrap_or(i64::MAX);
    last_failure_epoch.saturating_add(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_five_delays() {
        let delays: Vec<u64> = (1..=5).map(compute_delay).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 960]);
    }

    #[test]
    fn test_delay_sequence_reaches_cap_after_eleven_failures() {
        assert_eq!(compute_delay(11), 61_440);
        assert_eq!(compute_delay(12), MAX_DELAY_SECS);
        assert_eq!(compute_delay(13), MAX_DELAY_SECS);
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        for n in 1..200u32 {
            let this = compute_delay(n);
            let next = compute_delay(n + 1);
            assert_eq!(next, (this * 2).min(MAX_DELAY_SECS), "n={n}");
            assert!(next >= this);
        }
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        assert_eq!(compute_delay(64), MAX_DELAY_SECS);
        assert_eq!(compute_delay(u32::MAX), MAX_DELAY_SECS);
    }

    #[test]
    fn test_zero_count_behaves_like_one() {
        assert_eq!(compute_delay(0), BASE_DELAY_SECS);
    }

    #[test]
    fn test_retry_boundary_is_inclusive() {
        let last = 1_000_000;
        assert!(!should_retry_now(last, 3, last + 239));
        assert!(should_retry_now(last, 3, last + 240));
        assert!(should_retry_now(last, 3, last + 10_000));
    }

    #[test]
    fn test_clock_behind_last_failure_never_retries() {
        assert!(!should_retry_now(1_000, 1, 900));
    }

    #[test]
    fn test_retry_at_adds_delay() {
        assert_eq!(retry_at(1_000, 1), 1_060);
        assert_eq!(retry_at(1_000, 30), 1_000 + MAX_DELAY_SECS as i64);
    }
}
