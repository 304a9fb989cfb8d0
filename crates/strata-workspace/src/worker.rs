use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use strata_core::FilePath;
use strata_project::{ProjectSnapshot, ProjectSnapshotUpdateContext, TagHelperDescriptor};
use strata_scheduler::{
    BatchDebouncer, BatchError, CancellationToken, Cancelled, PoolKind, Scheduler, TaskError,
};

use crate::{BackgroundWorkQueue, ProjectManagerHandle, ResolveError};

/// Discovers the tag helpers available to a project.
pub trait TagHelperResolver: Send + Sync {
    fn resolve(
        &self,
        snapshot: Arc<ProjectSnapshot>,
    ) -> BoxFuture<'static, Result<Vec<TagHelperDescriptor>, ResolveError>>;
}

#[derive(Clone)]
pub struct ProjectSnapshotWorker {
    resolver: Arc<dyn TagHelperResolver>,
}

impl ProjectSnapshotWorker {
    pub fn new(resolver: Arc<dyn TagHelperResolver>) -> Self {
        Self { resolver }
    }

    /// Fill `update` with freshly resolved tag helpers.
    pub async fn process_update(
        &self,
        update: ProjectSnapshotUpdateContext,
    ) -> Result<ProjectSnapshotUpdateContext, ResolveError> {
        let tag_helpers = self.resolver.resolve(Arc::clone(&update.snapshot)).await?;
        Ok(update.with_tag_helpers(tag_helpers))
    }
}

/// Debounces background work per project and posts results back to the manager.
///
/// Only the latest update for each project survives the debounce window. A failed resolution is
/// reported and installed as an empty result so the project does not stay dirty forever.
pub struct ProjectSnapshotWorkerQueue {
    debouncer: BatchDebouncer<FilePath, ProjectSnapshotUpdateContext>,
}

impl ProjectSnapshotWorkerQueue {
    pub fn new(
        scheduler: Scheduler,
        delay: Duration,
        worker: ProjectSnapshotWorker,
        manager: ProjectManagerHandle,
    ) -> Self {
        let io = scheduler.clone();
        let processor = move |batch: Vec<(FilePath, ProjectSnapshotUpdateContext)>,
                              token: &CancellationToken|
              -> Result<(), BatchError> {
            for (file_path, update) in batch {
                Cancelled::check(token)?;

                let version = update.version();
                let worker = worker.clone();
                let scheduled = update.clone();
                let task = io.spawn_io_with_token(token.child_token(), move |_token| async move {
                    Ok(worker.process_update(scheduled).await)
                });
                let result = match futures::executor::block_on(task) {
                    Ok(result) => result,
                    Err(TaskError::Cancelled) => return Err(Cancelled.into()),
                    Err(TaskError::Panicked) => Err(ResolveError::panicked(&file_path)),
                };
                let completed = match result {
                    Ok(completed) => {
                        tracing::debug!(
                            target: "strata.workspace",
                            project = %file_path,
                            version = %version,
                            tag_helpers = completed.tag_helpers.len(),
                            "computed tag helpers"
                        );
                        completed
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "strata.workspace",
                            project = %file_path,
                            version = %version,
                            error = %err,
                            "tag helper resolution failed"
                        );
                        manager
                            .report_error(Arc::new(err), Some(file_path.clone()))
                            .map_err(|err| BatchError::Failed(err.to_string()))?;
                        update.with_tag_helpers(Vec::new())
                    }
                };

                manager
                    .project_updated(completed)
                    .map_err(|err| BatchError::Failed(err.to_string()))?;
            }
            Ok(())
        };

        Self {
            debouncer: BatchDebouncer::new(
                "project-snapshot-worker",
                scheduler,
                PoolKind::Background,
                delay,
                processor,
            ),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.debouncer.pending_len()
    }

    pub fn is_idle(&self) -> bool {
        self.debouncer.is_idle()
    }
}

impl BackgroundWorkQueue for ProjectSnapshotWorkerQueue {
    fn enqueue(&self, update: ProjectSnapshotUpdateContext) {
        self.debouncer.enqueue(update.file_path().clone(), update);
    }
}

impl Drop for ProjectSnapshotWorkerQueue {
    fn drop(&mut self) {
        self.debouncer.shutdown();
    }
}
