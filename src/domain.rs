//! Data model (spec.md §3): repositories, tracked targets, build jobs,
//! and the enums that parameterize them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RepoId = i64;
pub type TargetId = i64;
pub type BuildId = uuid::Uuid;

/// `branch` | `tag` (spec.md §3 Tracked target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
        })
    }
}

impl FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "branch" => Ok(RefKind::Branch),
            "tag" => Ok(RefKind::Tag),
            other => Err(format!("unknown ref kind: {other}")),
        }
    }
}

/// `fast` | `pinned` environment-manager backend (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvManagerKind {
    Fast,
    Pinned,
}

impl fmt::Display for EnvManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnvManagerKind::Fast => "fast",
            EnvManagerKind::Pinned => "pinned",
        })
    }
}

impl FromStr for EnvManagerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(EnvManagerKind::Fast),
            "pinned" => Ok(EnvManagerKind::Pinned),
            other => Err(format!("unknown environment manager: {other}")),
        }
    }
}

/// A repository's access material: none, an HTTPS bearer-like token, or
/// an ephemeral SSH private key (spec.md §3 Repository, §4.1).
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessMaterial {
    None,
    HttpsToken { token: String },
    SshKey { private_key_pem: String },
}

impl fmt::Debug for AccessMaterial {
    /// Never print the secret material, even in debug builds.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMaterial::None => f.write_str("AccessMaterial::None"),
            AccessMaterial::HttpsToken { .. } => f.write_str("AccessMaterial::HttpsToken(..)"),
            AccessMaterial::SshKey { .. } => f.write_str("AccessMaterial::SshKey(..)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub display_name: String,
    pub provider_tag: String,
    pub clone_url: String,
    /// Docs subpath within the checkout, default `docs`.
    pub docs_subpath: String,
    pub access_material: AccessMaterial,
    pub verify_tls: bool,
    pub public: bool,
    /// The target id designated as this repository's "main" target, if any.
    pub main_target_id: Option<TargetId>,
    pub metadata: Option<RepositoryMetadata>,
}

/// Metadata extracted from the main target's manifest on a successful
/// build of that target (spec.md §4.3 step 7, §9 Metadata propagation).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub summary: Option<String>,
    pub homepage: Option<String>,
}

impl Repository {
    pub fn docs_subpath_or_default(subpath: Option<String>) -> String {
        subpath.filter(|s| !s.is_empty()).unwrap_or_else(|| "docs".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTarget {
    pub id: TargetId,
    pub repo_id: RepoId,
    pub ref_kind: RefKind,
    pub ref_name: String,
    pub auto_build: bool,
    /// Override of the repository/global default; `None` means inherit.
    pub env_manager_override: Option<EnvManagerKind>,
    pub last_built_commit: Option<String>,
    pub latest_successful_build_id: Option<BuildId>,
}

impl TrackedTarget {
    /// A filesystem-safe, human-readable slug for this target, e.g.
    /// `branch-main` or `tag-v1.2.0`, used in the publication layout
    /// (spec.md §4.6).
    pub fn slug(&self) -> String {
        let sanitized: String = self
            .ref_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
            .collect();
        format!("{}-{}", self.ref_kind, sanitized)
    }

    /// The environment-manager backend to use for a build of this
    /// target, resolved against the repository/global default.
    ///
    /// Resolved at *dispatch time* per spec.md §9's open question: the
    /// caller must re-read the target row immediately before this call
    /// rather than caching the result from enqueue time.
    pub fn resolve_env_manager(&self, global_default: EnvManagerKind) -> EnvManagerKind {
        self.env_manager_override.unwrap_or(global_default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Auto,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Manual => "manual",
            Trigger::Auto => "auto",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: BuildId,
    pub target_id: TargetId,
    pub status: JobStatus,
    pub trigger: Trigger,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub resolved_commit: Option<String>,
    pub log_path: Option<PathBuf>,
    pub artifact_path: Option<PathBuf>,
    pub error_kind: Option<String>,
}

impl BuildJob {
    pub fn new_queued(target_id: TargetId, trigger: Trigger) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            target_id,
            status: JobStatus::Queued,
            trigger,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            resolved_commit: None,
            log_path: None,
            artifact_path: None,
            error_kind: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_slug_sanitizes_ref_name() {
        let t = TrackedTarget {
            id: 1,
            repo_id: 1,
            ref_kind: RefKind::Tag,
            ref_name: "release/v1.2.0".to_string(),
            auto_build: false,
            env_manager_override: None,
            last_built_commit: None,
            latest_successful_build_id: None,
        };
        assert_eq!(t.slug(), "tag-release-v1.2.0");
    }

    #[test]
    fn env_manager_override_wins_over_default() {
        let mut t = sample_target();
        t.env_manager_override = Some(EnvManagerKind::Pinned);
        assert_eq!(t.resolve_env_manager(EnvManagerKind::Fast), EnvManagerKind::Pinned);
    }

    #[test]
    fn env_manager_falls_back_to_default_when_unset() {
        let t = sample_target();
        assert_eq!(t.resolve_env_manager(EnvManagerKind::Pinned), EnvManagerKind::Pinned);
    }

    #[test]
    fn ref_kind_round_trips_through_str() {
        assert_eq!("branch".parse::<RefKind>().unwrap(), RefKind::Branch);
        assert_eq!("TAG".parse::<RefKind>().unwrap(), RefKind::Tag);
        assert!("nonsense".parse::<RefKind>().is_err());
    }

    #[test]
    fn job_status_terminal_classification() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    fn sample_target() -> TrackedTarget {
        TrackedTarget {
            id: 1,
            repo_id: 1,
            ref_kind: RefKind::Branch,
            ref_name: "main".to_string(),
            auto_build: true,
            env_manager_override: None,
            last_built_commit: None,
            latest_successful_build_id: None,
        }
    }
}
