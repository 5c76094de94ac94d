//! Auto-build monitor (spec.md §4.5): a single-flighted periodic sweep
//! that compares each auto-tracked target's remote head against its
//! last-built commit and enqueues a rebuild when it has advanced.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::Trigger;
use crate::git::GitDriver;
use crate::queue::Queue;
use crate::store::{JobStore, RepositoryStore, TargetStore};

pub struct Monitor<S> {
    store: S,
    queue: Arc<Queue<S>>,
    git: GitDriver,
    interval: Duration,
}

impl<S> Monitor<S>
where
    S: JobStore + TargetStore + RepositoryStore + Clone + 'static,
{
    pub fn new(store: S, queue: Arc<Queue<S>>, git_timeout: Duration, interval: Duration) -> Self {
        Self { store, queue, git: GitDriver::new(git_timeout), interval }
    }

    /// Run the sweep loop forever. Intended to be spawned as a
    /// background task. Sweeps never overlap: the next sweep starts
    /// immediately after the previous one finishes, with no catch-up
    /// batching if a sweep overran `interval`.
    pub async fn run(self) {
        loop {
            let started = tokio::time::Instant::now();
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "auto-build sweep failed");
            }
            let elapsed = started.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
    }

    async fn sweep_once(&self) -> anyhow::Result<()> {
        let targets = self.store.list_auto_build().await?;
        info!(count = targets.len(), "auto-build sweep starting");

        for target in targets {
            if let Err(e) = self.sweep_target(&target).await {
                warn!(target_id = target.id, error = %e, "auto-build sweep failed for target");
            }
        }
        Ok(())
    }

    async fn sweep_target(&self, target: &crate::domain::TrackedTarget) -> anyhow::Result<()> {
        if self.store.has_active_job_for_target(target.id).await? {
            return Ok(());
        }

        let repo = match self.store.get_repository(target.repo_id).await? {
            Some(repo) => repo,
            None => return Ok(()),
        };

        let remote_commit = self.git.remote_head(&repo, target.ref_kind, &target.ref_name).await?;

        if Some(&remote_commit) != target.last_built_commit.as_ref() {
            info!(
                target_id = target.id,
                remote_commit = %remote_commit,
                "remote advanced, enqueuing auto build"
            );
            self.queue.enqueue(target.id, Trigger::Auto).await?;
            self.queue.notify();
        }

        Ok(())
    }
}
