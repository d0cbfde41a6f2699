//! The [`Stage`] trait and the task runner that chains stages together.
//!
//! Each stage runs in its own tokio task and talks to its neighbours over
//! bounded channels, so a slow consumer throttles everything upstream of it.
//! All tasks share one [`CancellationToken`]. A stage that fails cancels the
//! token before dropping its output sender, so the stage below it observes
//! the cancellation instead of a clean end of input and never flushes a
//! partial result.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Default number of in-flight items between two stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A single-pass streaming transform.
///
/// Items are handed to [`process`](Stage::process) in arrival order. Outputs
/// are pushed into `out`, which the runner forwards downstream after every
/// call.
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Called once before any input. The default emits nothing.
    fn start(&mut self, _out: &mut Vec<Self::Output>) -> Result<()> {
        Ok(())
    }

    /// Consume one input item.
    fn process(&mut self, input: Self::Input, out: &mut Vec<Self::Output>) -> Result<()>;

    /// Called once after the upstream closed cleanly.
    fn finish(&mut self, out: &mut Vec<Self::Output>) -> Result<()>;
}

/// Run `stage` in a new task between `rx` and `tx`.
///
/// The task resolves to the stage itself on success so callers can read its
/// counters after the run.
pub fn spawn_stage<S: Stage>(
    mut stage: S,
    mut rx: mpsc::Receiver<S::Input>,
    tx: mpsc::Sender<S::Output>,
    cancel: CancellationToken,
) -> JoinHandle<Result<S>> {
    tokio::spawn(async move {
        let result = drive(&mut stage, &mut rx, &tx, &cancel).await;
        match result {
            Ok(()) => Ok(stage),
            Err(e) => {
                if e.is_root_cause() {
                    tracing::debug!(stage = stage.name(), "stage failed: {e}");
                }
                cancel.cancel();
                Err(e)
            }
        }
    })
}

async fn drive<S: Stage>(
    stage: &mut S,
    rx: &mut mpsc::Receiver<S::Input>,
    tx: &mpsc::Sender<S::Output>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut out = Vec::new();

    stage.start(&mut out)?;
    forward(&mut out, tx, cancel).await?;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            item = rx.recv() => item,
        };
        let Some(item) = next else { break };

        stage.process(item, &mut out)?;
        forward(&mut out, tx, cancel).await?;
    }

    // The upstream closed; only flush if that was a clean end of input.
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    stage.finish(&mut out)?;
    forward(&mut out, tx, cancel).await
}

/// Send everything buffered in `out`, waiting on backpressure.
pub(crate) async fn forward<T: Send>(
    out: &mut Vec<T>,
    tx: &mpsc::Sender<T>,
    cancel: &CancellationToken,
) -> Result<()> {
    for item in out.drain(..) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = tx.send(item) => {
                // The receiver is gone, meaning the next stage has stopped.
                sent.map_err(|_| Error::Cancelled)?;
            }
        }
    }
    Ok(())
}

/// Wait for a stage task, mapping panics to [`Error::Internal`].
pub async fn join_stage<T>(name: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("{name} task failed: {e}"))),
    }
}
