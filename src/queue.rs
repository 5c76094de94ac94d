//! Build queue & worker pool (spec.md §4.4): FIFO dispatch among queued
//! jobs subject to per-target mutual exclusion, startup recovery, and
//! cooperative cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::domain::{BuildId, JobStatus};
use crate::executor::{CancelFlag, Executor};
use crate::publish_store::PublicationPaths;
use crate::store::{JobStore, RepositoryStore, TargetStore};

pub struct Queue<S> {
    store: S,
    executor: Arc<Executor<S>>,
    paths: PublicationPaths,
    wakeup: Notify,
    cancel_flags: DashMap<BuildId, CancelFlag>,
    worker_count: usize,
}

impl<S> Queue<S>
where
    S: JobStore + TargetStore + RepositoryStore + Clone + 'static,
{
    pub fn new(store: S, executor: Executor<S>, paths: PublicationPaths, worker_count: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            executor: Arc::new(executor),
            paths,
            wakeup: Notify::new(),
            cancel_flags: DashMap::new(),
            worker_count,
        })
    }

    /// Transition any `running` job left over from a prior process to
    /// `failed`/`InterruptedAtStartup`, and remove its orphan workspace.
    pub async fn recover_startup(&self) -> Result<()> {
        let orphans = self.store.running_jobs().await?;
        for job in orphans {
            warn!(build_id = %job.id, "recovering orphaned running build from previous process");
            if let Some(path) = self.store.workspace_path(job.id).await? {
                self.paths.remove_workspace(&path).await.ok();
            }
            self.store
                .mark_terminal(job.id, JobStatus::Failed, Some("InterruptedAtStartup"), None)
                .await?;
        }
        Ok(())
    }

    /// Persist a new queued build and wake a worker.
    pub async fn enqueue(
        &self,
        target_id: crate::domain::TargetId,
        trigger: crate::domain::Trigger,
    ) -> Result<crate::domain::BuildJob> {
        let job = crate::domain::BuildJob::new_queued(target_id, trigger);
        self.store.insert_queued(&job).await?;
        self.notify();
        Ok(job)
    }

    /// Signal that dispatch should be attempted; safe to call redundantly.
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    /// Cancel `job_id` if still queued. No-op (returns `false`) if it has
    /// already started running or reached a terminal state; a caller
    /// wanting to cancel a running job should instead call
    /// [`request_cancel_running`].
    pub async fn cancel_queued(&self, job_id: BuildId) -> Result<bool> {
        self.store.cancel_if_queued(job_id).await
    }

    /// Signal an in-flight job's cancellation flag. Has effect only if
    /// checked before step 7 (publish) of the executor.
    pub fn request_cancel_running(&self, job_id: BuildId) {
        if let Some(flag) = self.cancel_flags.get(&job_id) {
            flag.signal();
        }
    }

    /// Spawn `worker_count` worker tasks plus a periodic-tick fallback so
    /// a missed notification is never fatal to liveness.
    pub fn spawn_workers(self: &Arc<Self>) {
        for worker_id in 0..self.worker_count {
            let queue = self.clone();
            tokio::spawn(async move { queue.worker_loop(worker_id).await });
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            match self.try_dispatch_one().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id, error = %e, "dispatch error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Pull the oldest queued job whose target has no other running job,
    /// CAS it into `running`, and execute it to completion. Returns
    /// whether a job was actually dispatched, so the caller can keep
    /// looping without waiting on the wakeup channel.
    async fn try_dispatch_one(&self) -> Result<bool> {
        let queued = self.store.queued_jobs_ordered().await?;
        let mut busy_targets: HashSet<crate::domain::TargetId> = HashSet::new();

        for job in queued {
            if busy_targets.contains(&job.target_id) {
                continue;
            }
            if self.store.has_running_job_for_target(job.target_id).await? {
                busy_targets.insert(job.target_id);
                continue;
            }
            if !self.store.try_start(job.id).await? {
                continue;
            }

            let flag = CancelFlag::new();
            self.cancel_flags.insert(job.id, flag.clone());
            let executor = self.executor.clone();
            let job_id = job.id;
            info!(build_id = %job_id, target_id = job.target_id, "dispatching build");

            if let Err(e) = executor.run(job, flag).await {
                error!(build_id = %job_id, error = %e, "executor returned an unexpected error");
            }
            self.cancel_flags.remove(&job_id);

            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvManagerKind, RefKind, Repository, TrackedTarget, Trigger};
    use crate::executor::{ExecutorConfig, PublishLocks};
    use crate::store::sqlite::SqliteStore;

    async fn setup() -> (SqliteStore, TrackedTarget) {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = RepositoryStore::insert_repository(
            &store,
            &Repository {
                id: 0,
                display_name: "example".into(),
                provider_tag: "github".into(),
                clone_url: "https://example.com/example.git".into(),
                docs_subpath: "docs".into(),
                access_material: crate::domain::AccessMaterial::None,
                verify_tls: true,
                public: true,
                main_target_id: None,
                metadata: None,
            },
        )
        .await
        .unwrap();
        let target = TargetStore::insert_target(
            &store,
            &TrackedTarget {
                id: 0,
                repo_id: repo.id,
                ref_kind: RefKind::Branch,
                ref_name: "main".into(),
                auto_build: false,
                env_manager_override: None,
                last_built_commit: None,
                latest_successful_build_id: None,
            },
        )
        .await
        .unwrap();
        (store, target)
    }

    fn test_executor(store: SqliteStore, dir: &std::path::Path) -> Executor<SqliteStore> {
        let paths = PublicationPaths::new(dir.to_path_buf());
        let locks: PublishLocks = Arc::new(DashMap::new());
        Executor::new(
            store,
            paths,
            locks,
            ExecutorConfig {
                git_timeout: std::time::Duration::from_secs(5),
                doc_build_timeout: std::time::Duration::from_secs(5),
                default_env_manager: EnvManagerKind::Fast,
                default_interpreter_version: "3.12".into(),
                operator_configured_extras: vec![],
                navigation_snippet_version: "test".into(),
            },
        )
    }

    #[tokio::test]
    async fn second_enqueue_while_one_queued_keeps_single_queued_row_exempt_from_duplicate_dispatch() {
        let (store, target) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let executor = test_executor(store.clone(), dir.path());
        let paths = PublicationPaths::new(dir.path().to_path_buf());
        let queue = Queue::new(store.clone(), executor, paths, 1);

        let first = queue.enqueue(target.id, Trigger::Manual).await.unwrap();
        let _second = queue.enqueue(target.id, Trigger::Manual).await.unwrap();

        // Dispatch claims the first job; the target now has an active
        // (running) job so the second stays queued behind it.
        assert!(queue.store.try_start(first.id).await.unwrap());
        assert!(queue.store.has_active_job_for_target(target.id).await.unwrap());
        let queued = queue.store.queued_jobs_ordered().await.unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn has_running_job_for_target_ignores_the_candidates_own_queued_row() {
        let (store, target) = setup().await;
        let job = crate::domain::BuildJob::new_queued(target.id, Trigger::Manual);
        store.insert_queued(&job).await.unwrap();

        // The only row for this target is `job` itself, still `queued`:
        // the dispatch-time check must not see it as a running conflict.
        assert!(!store.has_running_job_for_target(target.id).await.unwrap());

        assert!(store.try_start(job.id).await.unwrap());
        assert!(store.has_running_job_for_target(target.id).await.unwrap());
    }

    #[tokio::test]
    async fn recover_startup_fails_orphaned_running_jobs() {
        let (store, target) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let executor = test_executor(store.clone(), dir.path());
        let paths = PublicationPaths::new(dir.path().to_path_buf());
        let queue = Queue::new(store.clone(), executor, paths, 1);

        let job = queue.enqueue(target.id, Trigger::Manual).await.unwrap();
        assert!(store.try_start(job.id).await.unwrap());

        queue.recover_startup().await.unwrap();

        let reloaded = JobStore::get_job(&store, job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.error_kind.as_deref(), Some("InterruptedAtStartup"));
    }

    #[tokio::test]
    async fn cancel_queued_job_marks_it_cancelled() {
        let (store, target) = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let executor = test_executor(store.clone(), dir.path());
        let paths = PublicationPaths::new(dir.path().to_path_buf());
        let queue = Queue::new(store.clone(), executor, paths, 1);

        let job = queue.enqueue(target.id, Trigger::Manual).await.unwrap();
        assert!(queue.cancel_queued(job.id).await.unwrap());
        let reloaded = JobStore::get_job(&store, job.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Cancelled);
    }
}
