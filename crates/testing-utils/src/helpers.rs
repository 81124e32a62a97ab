//! Test helper utilities

use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// Poll `condition` until it holds or `timeout` elapses
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: StdDuration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(StdDuration::from_millis(20)).await;
        }
        false
    }
}

pub fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now - Duration::minutes(minutes)
}

pub fn hours_ago(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_polls_until_true() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ok = TestEnv::wait_for(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            StdDuration::from_secs(1),
        )
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
