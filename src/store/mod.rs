//! Persistence contract (spec.md §6): atomic insert of a queued build,
//! compare-and-set `queued`→`running`, terminal-state writes, and reads
//! of repositories/targets/the ordered queued set.
//!
//! Trait methods return `impl Future + Send` explicitly rather than
//! plain `async fn` so the futures stay `Send` across a `tokio::spawn`
//! boundary regardless of which concrete store backs a generic caller.

pub mod sqlite;

use std::future::Future;

use anyhow::Result;

use crate::domain::{BuildJob, JobStatus, Repository, RepositoryMetadata, TargetId, TrackedTarget};

/// Build-job persistence. Implementors must make the `queued`→`running`
/// transition a true compare-and-set keyed on `(target_id, status)` so
/// invariant 1 (at most one running build per target) holds under
/// concurrent workers.
pub trait JobStore: Send + Sync {
    fn insert_queued(&self, job: &BuildJob) -> impl Future<Output = Result<()>> + Send;
    fn queued_jobs_ordered(&self) -> impl Future<Output = Result<Vec<BuildJob>>> + Send;
    fn has_active_job_for_target(&self, target_id: TargetId) -> impl Future<Output = Result<bool>> + Send;
    /// Whether `target_id` already has a job in `running`. Unlike
    /// [`has_active_job_for_target`](Self::has_active_job_for_target),
    /// this excludes `queued` rows, so a dispatcher can call it with the
    /// candidate job's own (still-`queued`) id in scope without always
    /// seeing itself as the conflict.
    fn has_running_job_for_target(&self, target_id: TargetId) -> impl Future<Output = Result<bool>> + Send;
    /// Attempt to move `job_id` from `queued` to `running`. Returns
    /// `false` if another worker already claimed it or it is no longer
    /// `queued`.
    fn try_start(&self, job_id: crate::domain::BuildId) -> impl Future<Output = Result<bool>> + Send;
    fn set_workspace_path(
        &self,
        job_id: crate::domain::BuildId,
        path: &std::path::Path,
    ) -> impl Future<Output = Result<()>> + Send;
    fn set_resolved_commit(
        &self,
        job_id: crate::domain::BuildId,
        commit: &str,
    ) -> impl Future<Output = Result<()>> + Send;
    fn set_log_path(
        &self,
        job_id: crate::domain::BuildId,
        path: &std::path::Path,
    ) -> impl Future<Output = Result<()>> + Send;
    fn mark_terminal(
        &self,
        job_id: crate::domain::BuildId,
        status: JobStatus,
        error_kind: Option<&str>,
        artifact_path: Option<&std::path::Path>,
    ) -> impl Future<Output = Result<()>> + Send;
    fn cancel_if_queued(&self, job_id: crate::domain::BuildId) -> impl Future<Output = Result<bool>> + Send;
    fn get_job(&self, job_id: crate::domain::BuildId) -> impl Future<Output = Result<Option<BuildJob>>> + Send;
    fn list_for_target(&self, target_id: TargetId) -> impl Future<Output = Result<Vec<BuildJob>>> + Send;
    /// All jobs left `running` from a prior process (startup recovery).
    fn running_jobs(&self) -> impl Future<Output = Result<Vec<BuildJob>>> + Send;
    fn workspace_path(
        &self,
        job_id: crate::domain::BuildId,
    ) -> impl Future<Output = Result<Option<std::path::PathBuf>>> + Send;
}

pub trait RepositoryStore: Send + Sync {
    fn insert_repository(&self, repo: &Repository) -> impl Future<Output = Result<Repository>> + Send;
    fn get_repository(&self, id: crate::domain::RepoId) -> impl Future<Output = Result<Option<Repository>>> + Send;
    fn list(&self) -> impl Future<Output = Result<Vec<Repository>>> + Send;
    fn remove(&self, id: crate::domain::RepoId) -> impl Future<Output = Result<()>> + Send;
    fn update_metadata(
        &self,
        id: crate::domain::RepoId,
        metadata: RepositoryMetadata,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait TargetStore: Send + Sync {
    fn insert_target(&self, target: &TrackedTarget) -> impl Future<Output = Result<TrackedTarget>> + Send;
    fn get_target(&self, id: TargetId) -> impl Future<Output = Result<Option<TrackedTarget>>> + Send;
    fn list_for_repo(&self, repo_id: crate::domain::RepoId) -> impl Future<Output = Result<Vec<TrackedTarget>>> + Send;
    fn list_auto_build(&self) -> impl Future<Output = Result<Vec<TrackedTarget>>> + Send;
    fn update_last_built_commit(
        &self,
        id: TargetId,
        commit: &str,
        successful_build_id: crate::domain::BuildId,
    ) -> impl Future<Output = Result<()>> + Send;
}
