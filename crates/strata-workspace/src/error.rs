use std::error::Error;

use strata_core::FilePath;

/// Failure of an asynchronous tag helper resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("tag helper resolution was cancelled")]
    Cancelled,
    #[error("failed to resolve tag helpers for {project}: {message}")]
    Failed { project: FilePath, message: String },
}

impl ResolveError {
    pub(crate) fn panicked(project: &FilePath) -> Self {
        ResolveError::Failed {
            project: project.clone(),
            message: "tag helper resolver panicked".to_string(),
        }
    }
}

/// Failure reported by a [`DocumentOutputBuilder`](crate::DocumentOutputBuilder).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("document generation was cancelled")]
    Cancelled,
    #[error("failed to generate {document}: {message}")]
    Failed { document: FilePath, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    #[error("project manager has shut down")]
    Closed,
    #[error("blocking project manager queries cannot be issued from the foreground thread")]
    Reentrant,
}

/// Sink for errors raised by background work that has no caller to return them to.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, error: &(dyn Error + 'static), project: Option<&FilePath>);
}

/// Logs reported errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report_error(&self, error: &(dyn Error + 'static), project: Option<&FilePath>) {
        match project {
            Some(project) => tracing::error!(
                target: "strata.workspace",
                project = %project,
                error = %error,
                "background work failed"
            ),
            None => tracing::error!(
                target: "strata.workspace",
                error = %error,
                "background work failed"
            ),
        }
    }
}
