//! Atomic publication (spec.md §4.3 step 7). Holds the publication lock
//! only for the duration of the rename swap, not the whole build.

use std::path::Path;

use anyhow::{Context, Result};

use crate::error::BuildError;

/// Move `out_dir` into place as the new artifact directory for a target,
/// displacing (and then deleting) whatever was there before. `staging_dir`
/// must be on the same filesystem as `artifact_dir` so the final swap is
/// a plain `rename`.
pub async fn swap_in(out_dir: &Path, staging_dir: &Path, artifact_dir: &Path) -> Result<()> {
    if let Some(parent) = artifact_dir.parent() {
        tokio::fs::create_dir_all(parent).await.context("failed to create artifacts parent dir")?;
    }

    tokio::fs::rename(out_dir, staging_dir)
        .await
        .map_err(|e| BuildError::PublishFailed(format!("failed to stage artifact: {e}")))
        .context("staging rename failed")?;

    let displaced = artifact_dir.with_extension("displaced");
    let had_previous = artifact_dir.exists();
    if had_previous {
        tokio::fs::rename(artifact_dir, &displaced)
            .await
            .map_err(|e| BuildError::PublishFailed(format!("failed to displace previous artifact: {e}")))
            .context("displacement rename failed")?;
    }

    if let Err(e) = tokio::fs::rename(staging_dir, artifact_dir).await {
        // Best-effort restore of the previous artifact so a failed swap
        // never leaves the target without a served directory.
        if had_previous {
            let _ = tokio::fs::rename(&displaced, artifact_dir).await;
        }
        return Err(BuildError::PublishFailed(format!("failed to swap in new artifact: {e}")).into());
    }

    if had_previous {
        tokio::fs::remove_dir_all(&displaced).await.context("failed to delete displaced artifact")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_publication_creates_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        tokio::fs::create_dir_all(&out).await.unwrap();
        tokio::fs::write(out.join("index.html"), "hi").await.unwrap();

        let staging = dir.path().join("staging");
        let artifact = dir.path().join("artifacts").join("main");

        swap_in(&out, &staging, &artifact).await.unwrap();
        assert!(artifact.join("index.html").exists());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn second_publication_replaces_prior_artifact_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("artifacts").join("main");
        tokio::fs::create_dir_all(&artifact).await.unwrap();
        tokio::fs::write(artifact.join("index.html"), "old").await.unwrap();

        let out = dir.path().join("out2");
        tokio::fs::create_dir_all(&out).await.unwrap();
        tokio::fs::write(out.join("index.html"), "new").await.unwrap();

        let staging = dir.path().join("staging2");
        swap_in(&out, &staging, &artifact).await.unwrap();

        let contents = tokio::fs::read_to_string(artifact.join("index.html")).await.unwrap();
        assert_eq!(contents, "new");
        assert!(!staging.exists());
    }
}
