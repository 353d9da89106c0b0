//! Bounded scene fan-out.
//!
//! Items run in consecutive batches of `concurrency`; a batch is awaited in
//! full before the next one starts. Results come back in input order.

use std::future::Future;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use vnarr_models::MAX_SCENE_CONCURRENCY;

/// Cancellation was observed before every batch could be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stopped by user")]
pub struct Cancelled;

/// Run `f` over `items` with at most `concurrency` in flight.
///
/// `concurrency` is clamped to `1..=MAX_SCENE_CONCURRENCY`. The cancel flag
/// is checked before each batch; in-flight items are expected to observe the
/// same signal themselves.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    cancel: &watch::Receiver<bool>,
    f: F,
) -> Result<Vec<R>, Cancelled>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = concurrency.clamp(1, MAX_SCENE_CONCURRENCY);
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        if *cancel.borrow() {
            debug!(
                completed = results.len(),
                total, "Cancellation observed, not scheduling further batches"
            );
            return Err(Cancelled);
        }

        let batch: Vec<Fut> = items.by_ref().take(limit).map(&f).collect();
        debug!("Running batch of {} ({}/{} done)", batch.len(), results.len(), total);
        results.extend(join_all(batch).await);
    }

    Ok(results)
}

/// Resolve once `cancel` reads `true`. Never resolves if the sender is
/// dropped without cancelling.
pub async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
