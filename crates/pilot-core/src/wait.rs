//! Timeout-bounded polling primitives.
//!
//! One generic shape, [`poll_until`], instantiated for element appearance and
//! disappearance. Cancellation is timeout-only: a caller timing out does not
//! cancel the underlying page queries, which may still complete afterwards.

use std::future::Future;
use std::time::Duration;

use crate::coords::{self, CoordsQuery, CoordsResult, Rect};
use crate::error::{Error, Result};
use crate::session::{MAX_WAIT, Session};

/// Default gap between predicate invocations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Repeatedly invoke `predicate` every `interval` until it yields a value,
/// or fail with [`Error::Timeout`] once `timeout` elapses, whichever is
/// first. The deadline also cuts short a poll that itself never completes,
/// so a hung page query cannot escape the bound. Predicate errors propagate
/// immediately.
pub async fn poll_until<T, F, Fut>(
    mut predicate: F,
    interval: Duration,
    timeout: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let timeout = timeout.min(MAX_WAIT);
    let mut ticker = tokio::time::interval(interval);

    let polling = async {
        loop {
            ticker.tick().await;
            if let Some(value) = predicate().await? {
                return Ok(value);
            }
        }
    };

    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "condition not met within {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Wait until `selector` matches an element with geometry; returns its
/// screen rectangle.
pub async fn wait_for_element(
    session: &Session,
    selector: &str,
    timeout: Duration,
) -> Result<Rect> {
    let query = CoordsQuery {
        selector: selector.to_string(),
        index: 0,
        all: false,
    };
    poll_until(
        || async {
            match coords::get_coords(session, &query).await? {
                CoordsResult::One(rect) => Ok(Some(rect)),
                _ => Ok(None),
            }
        },
        POLL_INTERVAL,
        timeout,
    )
    .await
}

/// Wait until `selector` no longer matches any element with geometry.
pub async fn wait_for_element_to_not_exist(
    session: &Session,
    selector: &str,
    timeout: Duration,
) -> Result<()> {
    let query = CoordsQuery {
        selector: selector.to_string(),
        index: 0,
        all: false,
    };
    poll_until(
        || async {
            match coords::get_coords(session, &query).await? {
                CoordsResult::None => Ok(Some(())),
                _ => Ok(None),
            }
        },
        POLL_INTERVAL,
        timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn resolves_once_predicate_yields() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_predicate = Arc::clone(&calls);

        let value = poll_until(
            move || {
                let calls = Arc::clone(&calls_in_predicate);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok((n >= 4).then_some(n))
                }
            },
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_predicate_never_yields() {
        let start = tokio::time::Instant::now();
        let err = poll_until(
            || async { Ok(None::<u32>) },
            Duration::from_millis(10),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        // Rejects within one polling interval of the configured bound.
        assert!(start.elapsed() <= Duration::from_millis(210));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_even_when_a_single_poll_hangs() {
        // A poll stuck mid-flight (e.g. across a reconnect window) must not
        // suspend the deadline.
        let start = tokio::time::Instant::now();
        let err = poll_until(
            || std::future::pending::<Result<Option<u32>>>(),
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() <= Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_errors_propagate() {
        let err = poll_until(
            || async { Err::<Option<u32>, _>(Error::Unexpected("boom".to_string())) },
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Unexpected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_clamped_to_maximum() {
        let start = tokio::time::Instant::now();
        let err = poll_until(
            || async { Ok(None::<u32>) },
            Duration::from_millis(100),
            Duration::from_secs(600),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() <= MAX_WAIT + Duration::from_secs(1));
    }
}
