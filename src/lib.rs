//! `docsmith` — a control plane that keeps Git-hosted documentation
//! builds in sync with a declared set of tracked branches and tags.
//!
//! This crate implements the build-orchestration core: the job queue,
//! the worker pool, the per-build workspace lifecycle, the build
//! pipeline (clone → provision → build → publish), and the periodic
//! auto-build monitor. Administrator UI, authentication, and artifact
//! HTTP serving are external collaborators this crate does not provide.

pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod git;
pub mod logging;
pub mod monitor;
pub mod provisioner;
pub mod publish_store;
pub mod queue;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;

use crate::config::Config;
use crate::executor::{Executor, ExecutorConfig, PublishLocks};
use crate::monitor::Monitor;
use crate::publish_store::PublicationPaths;
use crate::queue::Queue;
use crate::store::sqlite::SqliteStore;

/// Everything needed to run the core as a long-lived process: the
/// worker pool and the auto-build monitor, both wired to the same
/// store and publication paths.
pub struct Runtime {
    pub store: SqliteStore,
    pub queue: Arc<Queue<SqliteStore>>,
    pub paths: PublicationPaths,
    config: Config,
}

impl Runtime {
    pub fn bootstrap(config: Config) -> Result<Self> {
        let db_path = config.data_dir.join("docsmith.sqlite3");
        let store = SqliteStore::open(&db_path)?;
        let paths = PublicationPaths::new(config.data_dir.clone());
        let publish_locks: PublishLocks = Arc::new(DashMap::new());

        let executor_config = ExecutorConfig {
            git_timeout: config.git_timeout,
            doc_build_timeout: config.doc_build_timeout,
            default_env_manager: config.default_env_manager,
            default_interpreter_version: config.default_interpreter_version.clone(),
            operator_configured_extras: Vec::new(),
            navigation_snippet_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let executor = Executor::new(store.clone(), paths.clone(), publish_locks, executor_config);
        let queue = Queue::new(store.clone(), executor, paths.clone(), config.worker_count);

        Ok(Self { store, queue, paths, config })
    }

    /// Recover orphaned `running` jobs, then spawn the worker pool and
    /// the auto-build monitor as background tasks.
    pub async fn run(&self) -> Result<()> {
        self.queue.recover_startup().await?;
        self.queue.spawn_workers();

        let monitor = Monitor::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.git_timeout,
            self.config.auto_build_interval,
        );
        tokio::spawn(monitor.run());

        Ok(())
    }
}
