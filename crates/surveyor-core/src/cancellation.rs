//! Cooperative cancellation helpers shared by every long-lived console task.
//!
//! A task owns a `CancellationToken` and checks it at every suspension point.
//! `TaskSlot` holds at most one such task and guarantees the previous one has
//! fully stopped before its replacement starts.

use std::future::Future;

use futures::future::{select_all, BoxFuture};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    Won { index: usize, value: T },
    Cancelled,
}

/// Resolves with whichever contender finishes first. The losers are dropped,
/// which cancels them. An empty race only ends through cancellation.
pub async fn race<'a, T>(
    cancel: &CancellationToken,
    contenders: Vec<BoxFuture<'a, T>>,
) -> RaceOutcome<T> {
    if contenders.is_empty() {
        cancel.cancelled().await;
        return RaceOutcome::Cancelled;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => RaceOutcome::Cancelled,
        (value, index, _rest) = select_all(contenders) => RaceOutcome::Won { index, value },
    }
}

/// Runs `fut` unless `cancel` fires first.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A single-occupancy slot for a cancellable background task.
#[derive(Default)]
pub struct TaskSlot {
    current: Mutex<Option<RunningTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels and joins the occupant (if any), then spawns `make(token)`.
    pub async fn replace<F, Fut>(&self, make: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.token.cancel();
            let _ = previous.handle.await;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(make(token.clone()));
        *current = Some(RunningTask {
            token: token.clone(),
            handle,
        });
        token
    }

    /// Cancels and joins the occupant.
    pub async fn clear(&self) {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.token.cancel();
            let _ = previous.handle.await;
        }
    }
}
