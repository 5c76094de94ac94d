//! Build executor: the linear 8-step state machine driving one job from
//! `running` to a terminal state (spec.md §4.3).

pub mod publish;
pub mod snippet;
pub mod workspace;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, info_span, warn, Instrument};

use crate::domain::{BuildJob, JobStatus, RepoId, RepositoryMetadata, TargetId};
use crate::error::{classify, BuildError};
use crate::git::GitDriver;
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::publish_store::PublicationPaths;
use crate::store::{JobStore, RepositoryStore, TargetStore};

use self::workspace::Workspace;

type PublishLockKey = (RepoId, TargetId);
pub type PublishLocks = Arc<DashMap<PublishLockKey, Arc<AsyncMutex<()>>>>;

/// Cooperative cancellation: checked at step boundaries only, never
/// mid-child-process. Signaled by the queue when a cancel is requested
/// for a job that is already running.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ExecutorConfig {
    pub git_timeout: Duration,
    pub doc_build_timeout: Duration,
    pub default_env_manager: crate::domain::EnvManagerKind,
    pub default_interpreter_version: String,
    pub operator_configured_extras: Vec<String>,
    pub navigation_snippet_version: String,
}

pub struct Executor<S> {
    store: S,
    paths: PublicationPaths,
    publish_locks: PublishLocks,
    config: ExecutorConfig,
}

impl<S> Executor<S>
where
    S: JobStore + TargetStore + RepositoryStore + Clone,
{
    pub fn new(store: S, paths: PublicationPaths, publish_locks: PublishLocks, config: ExecutorConfig) -> Self {
        Self { store, paths, publish_locks, config }
    }

    /// Run one job to completion. The job must already be in `running`
    /// status (the caller performed the CAS dispatch). Always persists a
    /// terminal status before returning, even on internal error.
    pub async fn run(&self, job: BuildJob, cancel: CancelFlag) -> Result<()> {
        let span = info_span!("build", build_id = %job.id, target_id = job.target_id);
        self.run_inner(job, cancel).instrument(span).await
    }

    async fn run_inner(&self, job: BuildJob, cancel: CancelFlag) -> Result<()> {
        let target = self
            .store
            .get_target(job.target_id)
            .await?
            .with_context(|| format!("target {} vanished before dispatch", job.target_id))?;
        let repo = self
            .store
            .get_repository(target.repo_id)
            .await?
            .with_context(|| format!("repository {} vanished before dispatch", target.repo_id))?;

        let outcome = self.drive(&job, &target, &repo, &cancel).await;

        match outcome {
            Ok(artifact_dir) => {
                self.store
                    .mark_terminal(job.id, JobStatus::Succeeded, None, Some(&artifact_dir))
                    .await?;
                info!("build succeeded");
                Ok(())
            }
            Err(e) if e.downcast_ref::<Cancelled>().is_some() => {
                self.store.mark_terminal(job.id, JobStatus::Cancelled, None, None).await?;
                info!("build cancelled");
                Ok(())
            }
            Err(e) => {
                let kind = classify(&e);
                warn!(error_kind = kind.kind_name(), error = %e, "build failed");
                self.store.mark_terminal(job.id, JobStatus::Failed, Some(kind.kind_name()), None).await?;
                Ok(())
            }
        }
    }

    async fn drive(
        &self,
        job: &BuildJob,
        target: &crate::domain::TrackedTarget,
        repo: &crate::domain::Repository,
        cancel: &CancelFlag,
    ) -> Result<std::path::PathBuf> {
        // Step 1: allocate workspace.
        let workspace_root = self.paths.workspace_dir(repo.id, target, job.id);
        let ws = Workspace::allocate(workspace_root.clone()).await?;
        self.store.set_workspace_path(job.id, &ws.root).await?;

        let log_path = self.paths.log_path(repo.id, target, job.id);
        self.store.set_log_path(job.id, &log_path).await?;
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = self.run_steps(job, target, repo, &ws, cancel, &log_path).await;

        match &result {
            Ok(_) => {
                ws.finalize_success().await?;
            }
            Err(_) => {
                ws.remove_all().await?;
            }
        }

        result
    }

    async fn run_steps(
        &self,
        job: &BuildJob,
        target: &crate::domain::TrackedTarget,
        repo: &crate::domain::Repository,
        ws: &Workspace,
        cancel: &CancelFlag,
        log_path: &Path,
    ) -> Result<std::path::PathBuf> {
        self.check_cancel(cancel)?;

        // Step 2: clone.
        let git = GitDriver::new(self.config.git_timeout);
        git.clone_into(repo, &ws.src).await?;

        self.check_cancel(cancel)?;

        // Step 3: checkout.
        let commit = git.checkout(repo, &ws.src, target.ref_kind, &target.ref_name).await?;
        self.store.set_resolved_commit(job.id, &commit).await?;

        self.check_cancel(cancel)?;

        // Step 4: provision environment. The env-manager override is
        // re-read here (dispatch time), not cached from enqueue.
        let fresh_target = self
            .store
            .get_target(target.id)
            .await?
            .with_context(|| format!("target {} vanished mid-build", target.id))?;
        let backend = fresh_target.resolve_env_manager(self.config.default_env_manager);
        let provisioner = Provisioner::for_backend(backend, self.config.git_timeout);
        let req = ProvisionRequest {
            checkout_root: &ws.src,
            env_dir: &ws.env,
            operator_configured_extras: &self.config.operator_configured_extras,
            default_interpreter_version: &self.config.default_interpreter_version,
        };
        provisioner.provision(&req).await.map_err(|e| BuildError::EnvProvisionFailed(e.to_string()))?;

        self.check_cancel(cancel)?;

        // Step 5: build docs, log tee'd to the job's log file.
        self.build_docs(repo, &ws.src, &ws.out, log_path).await?;

        self.check_cancel(cancel)?;

        // Step 6: inject navigation snippet.
        if ws.out.exists() {
            snippet::inject_into_tree(&ws.out, repo.id, target, &self.config.navigation_snippet_version).await?;
        } else {
            bail!(BuildError::PublishFailed("documentation generator produced no output directory".to_string()));
        }

        self.check_cancel(cancel)?;

        // Step 7: publish under the per-target lock.
        let artifact_dir = self.paths.artifact_dir(repo.id, target);
        let staging_dir = self.paths.artifact_staging_dir(repo.id, target, job.id);
        {
            let lock = self.lock_for(repo.id, target.id);
            let _guard = lock.lock().await;
            publish::swap_in(&ws.out, &staging_dir, &artifact_dir).await?;
        }

        self.store.update_last_built_commit(target.id, &commit, job.id).await?;

        if repo.main_target_id == Some(target.id) {
            if let Some(metadata) = extract_metadata(&ws.src).await {
                self.store.update_metadata(repo.id, metadata).await?;
            }
        }

        Ok(artifact_dir)
    }

    async fn build_docs(&self, repo: &crate::domain::Repository, src: &Path, out: &Path, log_path: &Path) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        use tokio::process::Command;

        let docs_dir = src.join(&repo.docs_subpath);
        let mut cmd = Command::new("sphinx-build");
        cmd.arg(&docs_dir).arg(out);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| BuildError::DocBuildFailed(e.to_string()))?;
        let mut log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .context("failed to open job log file")?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let wait = async {
            tokio::io::copy(&mut stdout, &mut log_file).await?;
            tokio::io::copy(&mut stderr, &mut log_file).await?;
            child.wait().await
        };

        let status = match tokio::time::timeout(self.config.doc_build_timeout, wait).await {
            Ok(result) => result.map_err(|e| BuildError::DocBuildFailed(e.to_string()))?,
            Err(_) => {
                let _ = child.kill().await;
                bail!(BuildError::DocBuildFailed("documentation generator timed out".to_string()));
            }
        };

        log_file.flush().await.ok();

        if !status.success() {
            bail!(BuildError::DocBuildFailed(format!("sphinx-build exited with {status}")));
        }
        Ok(())
    }

    fn lock_for(&self, repo_id: RepoId, target_id: TargetId) -> Arc<AsyncMutex<()>> {
        self.publish_locks.entry((repo_id, target_id)).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn check_cancel(&self, cancel: &CancelFlag) -> Result<()> {
        if cancel.is_set() {
            bail!(Cancelled);
        }
        Ok(())
    }
}

async fn extract_metadata(checkout_root: &Path) -> Option<RepositoryMetadata> {
    let info = crate::provisioner::manifest::discover(checkout_root).await.ok()?;
    if !info.has_manifest {
        return None;
    }
    // Manifest discovery intentionally only surfaces extras/version
    // constraints (spec.md §4.2); name/version/summary/homepage come
    // from the same `[project]` table but are read directly here since
    // only the main target's successful build needs them.
    let raw = tokio::fs::read_to_string(checkout_root.join("pyproject.toml")).await.ok()?;
    let parsed: toml::Value = toml::from_str(&raw).ok()?;
    let project = parsed.get("project")?;
    Some(RepositoryMetadata {
        name: project.get("name").and_then(|v| v.as_str()).map(ToString::to_string),
        version: project.get("version").and_then(|v| v.as_str()).map(ToString::to_string),
        summary: project.get("description").and_then(|v| v.as_str()).map(ToString::to_string),
        homepage: project
            .get("urls")
            .and_then(|v| v.get("Homepage"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
    })
}

#[derive(Debug, thiserror::Error)]
#[error("build cancelled")]
struct Cancelled;
