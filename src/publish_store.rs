//! Filesystem layout under the configured data directory (spec.md §4.6).
//! All path construction goes through this one helper, matching the
//! teacher's `config_dir()`/`config_file_path()` style in `main.rs`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::domain::{BuildId, RepoId, TrackedTarget};

#[derive(Clone)]
pub struct PublicationPaths {
    data_dir: PathBuf,
}

impl PublicationPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn target_root(&self, repo_id: RepoId, target: &TrackedTarget) -> PathBuf {
        self.data_dir.join("repos").join(repo_id.to_string()).join(target.slug())
    }

    pub fn workspace_dir(&self, repo_id: RepoId, target: &TrackedTarget, build_id: BuildId) -> PathBuf {
        self.target_root(repo_id, target).join("workspaces").join(build_id.to_string())
    }

    pub fn workspace_src(&self, workspace: &Path) -> PathBuf {
        workspace.join("src")
    }

    pub fn workspace_env(&self, workspace: &Path) -> PathBuf {
        workspace.join("env")
    }

    pub fn workspace_out(&self, workspace: &Path) -> PathBuf {
        workspace.join("out")
    }

    pub fn log_path(&self, repo_id: RepoId, target: &TrackedTarget, build_id: BuildId) -> PathBuf {
        self.target_root(repo_id, target).join("logs").join(format!("{build_id}.log"))
    }

    pub fn artifact_dir(&self, repo_id: RepoId, target: &TrackedTarget) -> PathBuf {
        self.data_dir.join("artifacts").join(repo_id.to_string()).join(target.slug())
    }

    /// A sibling of the final artifact directory used as the staging
    /// location for the atomic rename swap in the publish step.
    pub fn artifact_staging_dir(&self, repo_id: RepoId, target: &TrackedTarget, build_id: BuildId) -> PathBuf {
        self.data_dir
            .join("artifacts")
            .join(repo_id.to_string())
            .join(format!("{}.staging-{build_id}", target.slug()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Remove a target's published artifact directory.
    pub async fn delete_artifact(&self, repo_id: RepoId, target: &TrackedTarget) -> Result<()> {
        let dir = self.artifact_dir(repo_id, target);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.with_context(|| format!("failed to remove {}", dir.display()))?;
        }
        Ok(())
    }

    /// Delete log files under a target's log directory older than `horizon`.
    pub async fn delete_logs_older_than(
        &self,
        repo_id: RepoId,
        target: &TrackedTarget,
        horizon: DateTime<Utc>,
    ) -> Result<usize> {
        let log_dir = self.target_root(repo_id, target).join("logs");
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&log_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read log directory"),
        };
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if let Ok(modified) = metadata.modified() {
                let modified: DateTime<Utc> = modified.into();
                if modified < horizon {
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Cascade-delete everything under a repository's directory tree:
    /// all targets' workspaces, logs, and artifacts.
    pub async fn purge_repository(&self, repo_id: RepoId) -> Result<()> {
        let repo_dir = self.data_dir.join("repos").join(repo_id.to_string());
        if repo_dir.exists() {
            tokio::fs::remove_dir_all(&repo_dir).await.context("failed to purge repo workspace tree")?;
        }
        let artifacts_dir = self.data_dir.join("artifacts").join(repo_id.to_string());
        if artifacts_dir.exists() {
            tokio::fs::remove_dir_all(&artifacts_dir).await.context("failed to purge repo artifacts")?;
        }
        Ok(())
    }

    /// Remove a workspace directory unconditionally; used at the end of
    /// every build (success, failure, or startup-recovery cleanup).
    pub async fn remove_workspace(&self, workspace: &Path) -> Result<()> {
        if workspace.exists() {
            tokio::fs::remove_dir_all(workspace)
                .await
                .with_context(|| format!("failed to remove workspace {}", workspace.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RefKind;

    fn sample_target() -> TrackedTarget {
        TrackedTarget {
            id: 7,
            repo_id: 3,
            ref_kind: RefKind::Branch,
            ref_name: "main".into(),
            auto_build: true,
            env_manager_override: None,
            last_built_commit: None,
            latest_successful_build_id: None,
        }
    }

    #[test]
    fn layout_matches_documented_structure() {
        let paths = PublicationPaths::new(PathBuf::from("/data"));
        let target = sample_target();
        let build_id = BuildId::nil();

        assert_eq!(
            paths.workspace_dir(3, &target, build_id),
            PathBuf::from(format!("/data/repos/3/branch-main/workspaces/{build_id}"))
        );
        assert_eq!(paths.artifact_dir(3, &target), PathBuf::from("/data/artifacts/3/branch-main"));
        assert_eq!(paths.log_path(3, &target, build_id), PathBuf::from(format!("/data/repos/3/branch-main/logs/{build_id}.log")));
    }
}
