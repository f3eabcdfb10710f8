use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How the engine waits for DOM nodes to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Re-query the page on a fixed interval.
    #[default]
    Polling,
    /// Install a MutationObserver in the page and let it signal the match.
    Observer,
}

/// Runs `probe` until it yields a value or `timeout` elapses, pausing
/// `interval` between attempts.
///
/// The timeout is absolute, not renewable: it is checked against elapsed
/// wall-clock time after every failed probe, so the caller gets `None` no
/// earlier than the deadline and at most one interval past it. The loop
/// exits on both paths; there is no timer left behind.
pub async fn poll_until<T, F, Fut>(interval: Duration, timeout: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    loop {
        if let Some(found) = probe().await {
            return Some(found);
        }
        if start.elapsed() > timeout {
            return None;
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_within_one_interval_of_appearance() {
        let interval = Duration::from_millis(500);
        let start = Instant::now();
        let mut attempts = 0u32;
        let found = poll_until(interval, Duration::from_secs(10), || {
            attempts += 1;
            let ready = attempts >= 3;
            async move {
                if ready {
                    Some("element")
                } else {
                    None
                }
            }
        })
        .await;

        assert_eq!(found, Some("element"));
        // Two failed probes worth of waiting, never more.
        assert_eq!(start.elapsed(), interval * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn never_resolves_before_the_value_exists() {
        let found = poll_until(Duration::from_millis(500), Duration::from_millis(1600), || async {
            None::<&str>
        })
        .await;
        assert_eq!(found, None);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_no_earlier_than_the_deadline() {
        let timeout = Duration::from_millis(1600);
        let start = Instant::now();
        let found = poll_until(Duration::from_millis(500), timeout, || async { None::<()> }).await;

        assert_eq!(found, None);
        assert!(start.elapsed() >= timeout);
        // At most one interval late.
        assert!(start.elapsed() <= timeout + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success_does_not_sleep() {
        let start = Instant::now();
        let found = poll_until(Duration::from_millis(500), Duration::from_secs(10), || async {
            Some(42)
        })
        .await;
        assert_eq!(found, Some(42));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
