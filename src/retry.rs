//! Bounded retry for provisional outcomes.
//!
//! Both the group evaluation loop and the rebroadcast engine distinguish
//! "definitely no" from "cannot tell yet": the latter is worth re-checking
//! after a short delay because the sensing registry may simply not have
//! caught up. This module gives both the same bounded loop.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// One evaluation's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// Evaluation concluded positively; stop and yield the value.
    Accept(T),
    /// Definite rejection; stop immediately without retrying.
    Drop,
    /// Provisional failure; evaluate again after the delay.
    Retry,
}

/// Run `op` until it concludes, retrying provisional outcomes.
///
/// The first evaluation is free; after it, up to `attempts` re-evaluations
/// are made with `delay` between them. Returns `None` on a definite drop or
/// when the retry budget is exhausted while still provisional.
///
/// Each call evaluates `op` afresh, so re-evaluations observe current shared
/// state (e.g. a sensing registry that has caught up in the meantime).
pub async fn retry_bounded<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryOutcome<T>>,
{
    let mut used = 0u32;
    loop {
        match op().await {
            RetryOutcome::Accept(value) => return Some(value),
            RetryOutcome::Drop => return None,
            RetryOutcome::Retry => {
                if used >= attempts {
                    debug!(attempts, "retry budget exhausted while still provisional");
                    return None;
                }
                used += 1;
                debug!(attempt = used, delay_ms = delay.as_millis() as u64, "provisional outcome, waiting before retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
