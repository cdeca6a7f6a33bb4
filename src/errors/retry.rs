use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::types::GoadError;

/// Ceiling on any single backoff wait (36 minutes).
pub const MAX_BACKOFF_SECS: u64 = 2160;

/// Compute the wait duration before retry number `retry_count` (0-indexed).
///
/// Each stage is held for two attempts before escalating:
/// 10, 10, 60, 60, 360, 360, then 2160 for every further attempt.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let stage = retry_count / 2;
    let base = 10u64.saturating_mul(6u64.saturating_pow(stage));
    Duration::from_secs(base.min(MAX_BACKOFF_SECS))
}

/// Sleep out the backoff for `retry_count`, logging remaining time every
/// 60 seconds and polling the cancellation token once per second.
pub async fn wait_for_retry(
    retry_count: u32,
    round: u32,
    line: usize,
    cancel: &CancellationToken,
) -> Result<(), GoadError> {
    let total = backoff_delay(retry_count).as_secs();
    warn!(
        round,
        line,
        attempt = retry_count + 1,
        wait_secs = total,
        "Incomplete response — backing off before retry"
    );

    let mut remaining = total;
    while remaining > 0 {
        if remaining % 60 == 0 && remaining != total {
            info!(round, line, remaining_secs = remaining, "Backoff in progress");
        }
        if cancel.is_cancelled() {
            return Err(GoadError::Interrupted);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        remaining -= 1;
    }

    info!(round, line, attempt = retry_count + 1, "Backoff complete, retrying");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_ladder() {
        let expected: [u64; 10] = [10, 10, 60, 60, 360, 360, 2160, 2160, 2160, 2160];
        for (k, want) in expected.iter().enumerate() {
            assert_eq!(backoff_delay(k as u32).as_secs(), *want, "k={}", k);
        }
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        for k in 0..64 {
            assert!(backoff_delay(k).as_secs() <= MAX_BACKOFF_SECS);
        }
    }
}
