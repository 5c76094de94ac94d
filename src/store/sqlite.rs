//! `rusqlite`-backed implementation of the persistence traits, driven
//! from async code via `tokio::task::spawn_blocking` (teacher's own
//! persistence crate, generalized from `src/tui/db.rs`'s single-purpose
//! preferences table to the full domain model).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AccessMaterial, BuildId, BuildJob, JobStatus, RefKind, RepoId, Repository, RepositoryMetadata,
    TargetId, TrackedTarget, Trigger,
};

use super::{JobStore, RepositoryStore, TargetStore};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create data directory")?;
        }
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        conn.execute_batch(SCHEMA).context("failed to apply schema")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .context("sqlite worker task panicked")?
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    display_name TEXT NOT NULL,
    provider_tag TEXT NOT NULL,
    clone_url TEXT NOT NULL,
    docs_subpath TEXT NOT NULL,
    access_material_json TEXT NOT NULL,
    verify_tls INTEGER NOT NULL,
    public INTEGER NOT NULL,
    main_target_id INTEGER,
    metadata_json TEXT
);

CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL REFERENCES repositories(id),
    ref_kind TEXT NOT NULL,
    ref_name TEXT NOT NULL,
    auto_build INTEGER NOT NULL,
    env_manager_override TEXT,
    last_built_commit TEXT,
    latest_successful_build_id TEXT,
    UNIQUE(repo_id, ref_kind, ref_name)
);

CREATE TABLE IF NOT EXISTS builds (
    id TEXT PRIMARY KEY,
    target_id INTEGER NOT NULL REFERENCES targets(id),
    status TEXT NOT NULL,
    trigger TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    resolved_commit TEXT,
    workspace_path TEXT,
    log_path TEXT,
    artifact_path TEXT,
    error_kind TEXT
);

CREATE INDEX IF NOT EXISTS idx_builds_target_status ON builds(target_id, status);
"#;

fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repository> {
    let access_material_json: String = row.get("access_material_json")?;
    let metadata_json: Option<String> = row.get("metadata_json")?;
    Ok(Repository {
        id: row.get("id")?,
        display_name: row.get("display_name")?,
        provider_tag: row.get("provider_tag")?,
        clone_url: row.get("clone_url")?,
        docs_subpath: row.get("docs_subpath")?,
        access_material: serde_json::from_str(&access_material_json).unwrap_or(AccessMaterial::None),
        verify_tls: row.get::<_, i64>("verify_tls")? != 0,
        public: row.get::<_, i64>("public")? != 0,
        main_target_id: row.get("main_target_id")?,
        metadata: metadata_json.and_then(|j| serde_json::from_str(&j).ok()),
    })
}

fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedTarget> {
    let ref_kind: String = row.get("ref_kind")?;
    let env_override: Option<String> = row.get("env_manager_override")?;
    let build_id: Option<String> = row.get("latest_successful_build_id")?;
    Ok(TrackedTarget {
        id: row.get("id")?,
        repo_id: row.get("repo_id")?,
        ref_kind: RefKind::from_str(&ref_kind).unwrap_or(RefKind::Branch),
        ref_name: row.get("ref_name")?,
        auto_build: row.get::<_, i64>("auto_build")? != 0,
        env_manager_override: env_override.and_then(|s| s.parse().ok()),
        last_built_commit: row.get("last_built_commit")?,
        latest_successful_build_id: build_id.and_then(|s| BuildId::parse_str(&s).ok()),
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildJob> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let trigger: String = row.get("trigger")?;
    let enqueued_at: String = row.get("enqueued_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let log_path: Option<String> = row.get("log_path")?;
    let artifact_path: Option<String> = row.get("artifact_path")?;

    Ok(BuildJob {
        id: BuildId::parse_str(&id).unwrap_or_default(),
        target_id: row.get("target_id")?,
        status: parse_status(&status),
        trigger: if trigger == "auto" { Trigger::Auto } else { Trigger::Manual },
        enqueued_at: parse_timestamp(&enqueued_at),
        started_at: started_at.as_deref().map(parse_timestamp),
        ended_at: ended_at.as_deref().map(parse_timestamp),
        resolved_commit: row.get("resolved_commit")?,
        log_path: log_path.map(PathBuf::from),
        artifact_path: artifact_path.map(PathBuf::from),
        error_kind: row.get("error_kind")?,
    })
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "succeeded" => JobStatus::Succeeded,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Queued,
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

impl JobStore for SqliteStore {
    async fn insert_queued(&self, job: &BuildJob) -> Result<()> {
        let job = job.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO builds (id, target_id, status, trigger, enqueued_at) VALUES (?1, ?2, 'queued', ?3, ?4)",
                params![
                    job.id.to_string(),
                    job.target_id,
                    job.trigger.to_string(),
                    job.enqueued_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn queued_jobs_ordered(&self) -> Result<Vec<BuildJob>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM builds WHERE status = 'queued' ORDER BY enqueued_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([], row_to_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn has_active_job_for_target(&self, target_id: TargetId) -> Result<bool> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM builds WHERE target_id = ?1 AND status IN ('queued', 'running')",
                params![target_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn has_running_job_for_target(&self, target_id: TargetId) -> Result<bool> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM builds WHERE target_id = ?1 AND status = 'running'",
                params![target_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn try_start(&self, job_id: BuildId) -> Result<bool> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let updated = conn.execute(
                "UPDATE builds SET status = 'running', started_at = ?2 WHERE id = ?1 AND status = 'queued'",
                params![job_id.to_string(), now],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn set_workspace_path(&self, job_id: BuildId, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE builds SET workspace_path = ?2 WHERE id = ?1",
                params![job_id.to_string(), path.to_string_lossy().to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_resolved_commit(&self, job_id: BuildId, commit: &str) -> Result<()> {
        let commit = commit.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE builds SET resolved_commit = ?2 WHERE id = ?1",
                params![job_id.to_string(), commit],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_log_path(&self, job_id: BuildId, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE builds SET log_path = ?2 WHERE id = ?1",
                params![job_id.to_string(), path.to_string_lossy().to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_terminal(
        &self,
        job_id: BuildId,
        status: JobStatus,
        error_kind: Option<&str>,
        artifact_path: Option<&Path>,
    ) -> Result<()> {
        let status = status.to_string();
        let error_kind = error_kind.map(ToString::to_string);
        let artifact_path = artifact_path.map(|p| p.to_string_lossy().to_string());
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE builds SET status = ?2, ended_at = ?3, error_kind = ?4, artifact_path = COALESCE(?5, artifact_path) WHERE id = ?1",
                params![job_id.to_string(), status, now, error_kind, artifact_path],
            )?;
            Ok(())
        })
        .await
    }

    async fn cancel_if_queued(&self, job_id: BuildId) -> Result<bool> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE builds SET status = 'cancelled', ended_at = ?2 WHERE id = ?1 AND status = 'queued'",
                params![job_id.to_string(), Utc::now().to_rfc3339()],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    async fn get_job(&self, job_id: BuildId) -> Result<Option<BuildJob>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT * FROM builds WHERE id = ?1", params![job_id.to_string()], row_to_job)
                .optional()?)
        })
        .await
    }

    async fn list_for_target(&self, target_id: TargetId) -> Result<Vec<BuildJob>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM builds WHERE target_id = ?1 ORDER BY enqueued_at DESC",
            )?;
            let rows = stmt.query_map(params![target_id], row_to_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn workspace_path(&self, job_id: BuildId) -> Result<Option<PathBuf>> {
        self.with_conn(move |conn| {
            let path: Option<String> = conn
                .query_row(
                    "SELECT workspace_path FROM builds WHERE id = ?1",
                    params![job_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(path.map(PathBuf::from))
        })
        .await
    }

    async fn running_jobs(&self) -> Result<Vec<BuildJob>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM builds WHERE status = 'running'")?;
            let rows = stmt.query_map([], row_to_job)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

impl RepositoryStore for SqliteStore {
    async fn insert_repository(&self, repo: &Repository) -> Result<Repository> {
        let repo = repo.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO repositories (display_name, provider_tag, clone_url, docs_subpath, access_material_json, verify_tls, public, main_target_id, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    repo.display_name,
                    repo.provider_tag,
                    repo.clone_url,
                    repo.docs_subpath,
                    serde_json::to_string(&repo.access_material)?,
                    repo.verify_tls as i64,
                    repo.public as i64,
                    repo.main_target_id,
                    repo.metadata.as_ref().map(serde_json::to_string).transpose()?,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Repository { id, ..repo })
        })
        .await
    }

    async fn get_repository(&self, id: RepoId) -> Result<Option<Repository>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT * FROM repositories WHERE id = ?1", params![id], row_to_repository)
                .optional()?)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM repositories ORDER BY id ASC")?;
            let rows = stmt.query_map([], row_to_repository)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn remove(&self, id: RepoId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM builds WHERE target_id IN (SELECT id FROM targets WHERE repo_id = ?1)",
                params![id],
            )?;
            conn.execute("DELETE FROM targets WHERE repo_id = ?1", params![id])?;
            conn.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn update_metadata(&self, id: RepoId, metadata: RepositoryMetadata) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE repositories SET metadata_json = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(&metadata)?],
            )?;
            Ok(())
        })
        .await
    }
}

impl TargetStore for SqliteStore {
    async fn insert_target(&self, target: &TrackedTarget) -> Result<TrackedTarget> {
        let target = target.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO targets (repo_id, ref_kind, ref_name, auto_build, env_manager_override)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    target.repo_id,
                    target.ref_kind.to_string(),
                    target.ref_name,
                    target.auto_build as i64,
                    target.env_manager_override.map(|k| k.to_string()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(TrackedTarget { id, ..target })
        })
        .await
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<TrackedTarget>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT * FROM targets WHERE id = ?1", params![id], row_to_target)
                .optional()?)
        })
        .await
    }

    async fn list_for_repo(&self, repo_id: RepoId) -> Result<Vec<TrackedTarget>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM targets WHERE repo_id = ?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![repo_id], row_to_target)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_auto_build(&self) -> Result<Vec<TrackedTarget>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM targets WHERE auto_build = 1 ORDER BY id ASC")?;
            let rows = stmt.query_map([], row_to_target)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn update_last_built_commit(
        &self,
        id: TargetId,
        commit: &str,
        successful_build_id: BuildId,
    ) -> Result<()> {
        let commit = commit.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE targets SET last_built_commit = ?2, latest_successful_build_id = ?3 WHERE id = ?1",
                params![id, commit, successful_build_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trigger;

    fn sample_repo() -> Repository {
        Repository {
            id: 0,
            display_name: "example".into(),
            provider_tag: "github".into(),
            clone_url: "https://example.com/example.git".into(),
            docs_subpath: "docs".into(),
            access_material: AccessMaterial::None,
            verify_tls: true,
            public: true,
            main_target_id: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_repository_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let inserted = RepositoryStore::insert_repository(&store, &sample_repo()).await.unwrap();
        let fetched = RepositoryStore::get_repository(&store, inserted.id).await.unwrap().unwrap();
        assert_eq!(fetched.display_name, "example");
    }

    #[tokio::test]
    async fn try_start_is_single_winner_under_concurrent_dispatch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = RepositoryStore::insert_repository(&store, &sample_repo()).await.unwrap();
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

        let job = BuildJob::new_queued(target.id, Trigger::Manual);
        JobStore::insert_queued(&store, &job).await.unwrap();

        let (a, b) = tokio::join!(
            JobStore::try_start(&store, job.id),
            JobStore::try_start(&store, job.id),
        );
        assert_ne!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn queued_jobs_are_ordered_by_enqueue_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = RepositoryStore::insert_repository(&store, &sample_repo()).await.unwrap();
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

        let first = BuildJob::new_queued(target.id, Trigger::Manual);
        JobStore::insert_queued(&store, &first).await.unwrap();
        let second = BuildJob::new_queued(target.id, Trigger::Manual);
        JobStore::insert_queued(&store, &second).await.unwrap();

        let queued = JobStore::queued_jobs_ordered(&store).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, first.id);
    }
}
