use std::{future::Future, pin::Pin, task::Poll};

use tokio::sync::oneshot;

use crate::{CancellationToken, TaskError};

/// Handle to a job running on one of the scheduler's blocking pools.
///
/// Dropping the handle detaches the job; it still runs to completion.
pub struct BlockingTask<T> {
    token: CancellationToken,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> BlockingTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        rx: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, rx }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn join(self) -> Result<T, TaskError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TaskError::Cancelled),
            result = self.rx => match result {
                Ok(result) => result,
                // The job dropped its sender without reporting, which only happens on unwind.
                Err(_) => Err(TaskError::Panicked),
            }
        }
    }
}

/// Handle to a future running on the scheduler's IO runtime.
pub struct AsyncTask<T> {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<Result<T, TaskError>>,
}

impl<T> AsyncTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        handle: tokio::task::JoinHandle<Result<T, TaskError>>,
    ) -> Self {
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn map_join(result: Result<Result<T, TaskError>, tokio::task::JoinError>) -> Result<T, TaskError> {
        match result {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(TaskError::Cancelled),
            Err(_) => Err(TaskError::Panicked),
        }
    }
}

impl<T> Future for AsyncTask<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancelled() {
            self.handle.abort();
            return Poll::Ready(Err(TaskError::Cancelled));
        }

        Pin::new(&mut self.handle).poll(cx).map(Self::map_join)
    }
}

impl<T> Drop for AsyncTask<T> {
    fn drop(&mut self) {
        if self.token.is_cancelled() {
            self.handle.abort();
        }
    }
}
