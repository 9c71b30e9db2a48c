//! Common test utilities shared across integration tests.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tempo::JobArgs;

/// Build an argument bag from a JSON object literal.
///
/// # Panics
///
/// Panics if the value is not a JSON object.
pub fn args_of(value: Value) -> JobArgs {
    value.as_object().cloned().expect("expected a JSON object")
}

/// Poll a probe until it reports true, or panic after the timeout.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached before the probe succeeds.
pub async fn eventually<F, Fut>(timeout: Duration, what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if probe().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
