//! Cancellable periodic tasks
//!
//! Each loop runs its task, then waits `interval` (or `2 × interval` after a
//! failure) before the next run. A failure never ends the loop; only the
//! shared [`CancellationToken`] does, and it also interrupts a run in
//! progress.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Multiplier applied to the interval after a failed run
pub const ERROR_BACKOFF_FACTOR: u32 = 2;

pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(task = name, interval_secs = interval.as_secs(), "Periodic task started");

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = task() => result,
            };

            let wait = match result {
                Ok(()) => interval,
                Err(e) => {
                    let backoff = interval * ERROR_BACKOFF_FACTOR;
                    tracing::warn!(
                        task = name,
                        retry_in_secs = backoff.as_secs(),
                        "Periodic task failed: {}",
                        e
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(task = name, "Periodic task stopped");
    })
}
