//! Batched, debounced re-indexing of changed projects.
//!
//! Changes are collected for a short window and then processed together.
//! Only the latest snapshot of each project in a batch is indexed. Work for
//! different projects runs in parallel; the cache service keeps work for
//! one project serial.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::IndexerConfig;
use crate::error::{Result, SymbolTreeError};
use crate::workspace::{Project, ProjectId};

use super::cache::SymbolTreeCacheService;

/// Commands that can be sent to the work queue worker.
#[derive(Debug)]
pub enum WorkCommand {
    /// A new snapshot of a project needs indexing
    ProjectChanged(Arc<Project>),
    /// A project left the workspace
    ProjectRemoved(ProjectId),
    /// Process everything queued so far, then respond
    Flush { respond: oneshot::Sender<()> },
    /// Shutdown the work queue worker
    Shutdown,
}

#[derive(Debug)]
enum PendingWork {
    Update(Arc<Project>),
    Remove,
}

/// Handle for sending work to the queue. Cheaply cloneable.
#[derive(Clone)]
pub struct WorkQueueHandle {
    sender: mpsc::Sender<WorkCommand>,
    service: Arc<SymbolTreeCacheService>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl WorkQueueHandle {
    const DEFAULT_BUFFER_SIZE: usize = 256;

    /// Creates a handle and spawns the worker task. Must be called inside a
    /// tokio runtime.
    pub fn new(service: Arc<SymbolTreeCacheService>, debounce: Duration) -> Self {
        Self::with_buffer_size(service, debounce, Self::DEFAULT_BUFFER_SIZE)
    }

    pub fn from_config(service: Arc<SymbolTreeCacheService>, config: &IndexerConfig) -> Self {
        Self::with_buffer_size(service, config.debounce(), config.queue_capacity)
    }

    pub fn with_buffer_size(
        service: Arc<SymbolTreeCacheService>,
        debounce: Duration,
        buffer_size: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let cancel = Arc::new(Mutex::new(CancellationToken::new()));
        let worker = WorkQueueWorker {
            receiver,
            service: service.clone(),
            debounce,
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            worker.run().await;
        });

        Self {
            sender,
            service,
            cancel,
        }
    }

    /// Queues a re-index of `project`. A later snapshot of the same project
    /// queued within the same window replaces this one.
    pub async fn enqueue_project(&self, project: Arc<Project>) -> Result<()> {
        self.service.mark_stale(project.id);
        self.send(WorkCommand::ProjectChanged(project)).await
    }

    pub async fn remove_project(&self, project_id: ProjectId) -> Result<()> {
        self.send(WorkCommand::ProjectRemoved(project_id)).await
    }

    /// Waits until everything queued before this call has been processed.
    pub async fn flush(&self) -> Result<()> {
        let (respond, rx) = oneshot::channel();
        self.send(WorkCommand::Flush { respond }).await?;
        rx.await
            .map_err(|_| SymbolTreeError::WorkQueue("Flush response channel closed".into()))
    }

    /// Cancels index builds that are currently running. Queued work is
    /// unaffected until the next batch starts.
    pub fn cancel_running(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Shuts down the worker. Work still waiting for its batch is dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WorkCommand::Shutdown)
            .await
            .map_err(|_| SymbolTreeError::WorkQueue("Work queue already closed".into()))
    }

    pub fn is_active(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn service(&self) -> &Arc<SymbolTreeCacheService> {
        &self.service
    }

    async fn send(&self, command: WorkCommand) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SymbolTreeError::WorkQueue("Work queue closed".into()))
    }
}

struct WorkQueueWorker {
    receiver: mpsc::Receiver<WorkCommand>,
    service: Arc<SymbolTreeCacheService>,
    debounce: Duration,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl WorkQueueWorker {
    async fn run(mut self) {
        tracing::debug!("WorkQueue worker started");

        let mut pending: HashMap<ProjectId, PendingWork> = HashMap::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let command = match deadline {
                Some(at) => match timeout_at(at, self.receiver.recv()).await {
                    Ok(command) => command,
                    Err(_) => {
                        self.process_batch(&mut pending).await;
                        deadline = None;
                        continue;
                    }
                },
                None => self.receiver.recv().await,
            };

            match command {
                Some(WorkCommand::ProjectChanged(project)) => {
                    pending.insert(project.id, PendingWork::Update(project));
                    deadline.get_or_insert_with(|| Instant::now() + self.debounce);
                }
                Some(WorkCommand::ProjectRemoved(project_id)) => {
                    pending.insert(project_id, PendingWork::Remove);
                    deadline.get_or_insert_with(|| Instant::now() + self.debounce);
                }
                Some(WorkCommand::Flush { respond }) => {
                    self.process_batch(&mut pending).await;
                    deadline = None;
                    let _ = respond.send(());
                }
                Some(WorkCommand::Shutdown) => {
                    tracing::debug!("WorkQueue worker shutting down");
                    break;
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            tracing::debug!("Dropping {} queued projects", pending.len());
        }
        tracing::debug!("WorkQueue worker stopped");
    }

    async fn process_batch(&self, pending: &mut HashMap<ProjectId, PendingWork>) {
        if pending.is_empty() {
            return;
        }
        let cancel = {
            let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
            current.clone()
        };
        tracing::debug!("Processing batch of {} projects", pending.len());

        let mut tasks = JoinSet::new();
        for (project_id, work) in pending.drain() {
            match work {
                PendingWork::Remove => self.service.remove_project(project_id),
                PendingWork::Update(project) => {
                    let service = self.service.clone();
                    let cancel = cancel.clone();
                    tasks.spawn(async move {
                        let result = service.update_project(&project, &cancel).await;
                        (project, result)
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((project, Err(SymbolTreeError::Cancelled))) => {
                    tracing::debug!("Indexing of {} was cancelled", project.name)
                }
                Ok((project, Err(e))) => {
                    tracing::warn!("Failed to index {}: {}", project.name, e)
                }
                Err(e) => tracing::warn!("Indexing task failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cache::IndexState;
    use crate::index::storage::NoOpStorage;
    use crate::symbols::{AssemblyDef, SymbolDef};

    fn project(class: &str) -> Project {
        let assembly = AssemblyDef::new(
            "App",
            SymbolDef::global_namespace()
                .with_member(SymbolDef::namespace("App").with_member(SymbolDef::class(class))),
        );
        Project::new("App", Arc::new(assembly))
    }

    fn queue() -> WorkQueueHandle {
        let service = Arc::new(SymbolTreeCacheService::new(Arc::new(NoOpStorage)));
        WorkQueueHandle::new(service, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_flush_indexes_queued_project() {
        let queue = queue();
        let project = Arc::new(project("Service"));

        queue.enqueue_project(project.clone()).await.unwrap();
        queue.flush().await.unwrap();

        let info = queue.service().source_info(project.id).unwrap();
        assert_eq!(info.find_node_indices("Service", false).len(), 1);
        assert!(matches!(
            queue.service().index_state(project.id),
            IndexState::Indexed(_)
        ));

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins_within_batch() {
        let queue = queue();
        let first = Arc::new(project("Before"));
        let second = Arc::new(first.with_assembly(project("After").assembly.clone()));

        queue.enqueue_project(first.clone()).await.unwrap();
        queue.enqueue_project(second).await.unwrap();
        queue.flush().await.unwrap();

        let info = queue.service().source_info(first.id).unwrap();
        assert!(info.find_node_indices("Before", false).is_empty());
        assert_eq!(info.find_node_indices("After", false).len(), 1);
        assert_eq!(queue.service().stats().source_builds, 1);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_debounce_processes_without_flush() {
        let queue = queue();
        let project = Arc::new(project("Service"));

        queue.enqueue_project(project.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(queue.service().source_info(project.id).is_some());
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_project() {
        let queue = queue();
        let project = Arc::new(project("Service"));

        queue.enqueue_project(project.clone()).await.unwrap();
        queue.flush().await.unwrap();
        queue.remove_project(project.id).await.unwrap();
        queue.flush().await.unwrap();

        assert!(queue.service().source_info(project.id).is_none());
        assert_eq!(queue.service().index_state(project.id), IndexState::Removed);

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_running_does_not_poison_later_batches() {
        let queue = queue();
        let project = Arc::new(project("Service"));

        queue.cancel_running();
        queue.enqueue_project(project.clone()).await.unwrap();
        queue.flush().await.unwrap();

        assert!(matches!(
            queue.service().index_state(project.id),
            IndexState::Indexed(_)
        ));
        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown() {
        let queue = queue();
        assert!(queue.is_active());

        queue.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = queue.enqueue_project(Arc::new(project("Late"))).await;
        assert!(result.is_err());
        assert!(!queue.is_active());
    }
}
