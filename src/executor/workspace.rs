//! Per-build workspace allocation (spec.md §4.3 step 1, §9 "per-job
//! workspace isolation"). Never shared across jobs; cleanup is always a
//! single recursive delete of the top-level directory.

use std::path::PathBuf;

use anyhow::{Context, Result};

pub struct Workspace {
    pub root: PathBuf,
    pub src: PathBuf,
    pub env: PathBuf,
    pub out: PathBuf,
}

impl Workspace {
    /// Create the workspace directory and its three subdirectories.
    pub async fn allocate(root: PathBuf) -> Result<Self> {
        let src = root.join("src");
        let env = root.join("env");
        let out = root.join("out");

        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create workspace {}", root.display()))?;
        tokio::fs::create_dir_all(&env).await?;
        tokio::fs::create_dir_all(&out).await?;
        // `src` is created by the git driver's clone, not here.

        Ok(Self { root, src, env, out })
    }

    /// Remove `src/` and `env/`, keeping `out/` (and the separately
    /// tracked log file) around long enough for publication to consume
    /// it, per step 8 of the build sequence.
    pub async fn finalize_success(&self) -> Result<()> {
        remove_if_exists(&self.src).await?;
        remove_if_exists(&self.env).await?;
        Ok(())
    }

    /// Remove the whole workspace unconditionally: used on failure,
    /// cancellation, and startup recovery of an orphaned directory.
    pub async fn remove_all(&self) -> Result<()> {
        remove_if_exists(&self.root).await
    }
}

async fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
