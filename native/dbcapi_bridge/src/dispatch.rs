/// Work dispatch
///
/// A request runs inline on the caller's thread, or is offloaded to the worker
/// pool when the caller supplies a continuation. The choice is made once, when the
/// call enters. An offloaded request delivers exactly one outcome and cannot be
/// cancelled.
use tokio::sync::oneshot;

use crate::constants::WORKER_RUNTIME;
use crate::error::{Error, Result};

/// Continuation receiving the single outcome of an offloaded request.
pub type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// A request running on the worker pool.
#[must_use = "a task delivers its outcome through get() or then()"]
pub struct Task<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// Queue `work` on a blocking worker thread.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        WORKER_RUNTIME.spawn_blocking(move || {
            if tx.send(work()).is_err() {
                log::warn!("request outcome dropped: nobody is waiting for it");
            }
        });
        Task { rx }
    }

    /// Block the calling thread until the outcome arrives.
    ///
    /// Must not be called from inside an async context.
    pub fn get(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| worker_crashed())?
    }

    /// Hand the outcome to `continuation` once it arrives.
    pub fn then<C>(self, continuation: C)
    where
        C: FnOnce(Result<T>) + Send + 'static,
    {
        WORKER_RUNTIME.spawn(async move {
            let outcome = match self.rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(worker_crashed()),
            };
            continuation(outcome);
        });
    }
}

fn worker_crashed() -> Error {
    Error::General("worker thread ended without an outcome".to_string())
}

/// Run `work` inline when no continuation is given, otherwise offload it.
///
/// Returns the outcome of an inline run, `None` when the outcome goes to the
/// continuation.
pub fn run<T, F>(work: F, continuation: Option<Continuation<T>>) -> Option<Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match continuation {
        None => Some(work()),
        Some(continuation) => {
            Task::spawn(work).then(continuation);
            None
        }
    }
}
