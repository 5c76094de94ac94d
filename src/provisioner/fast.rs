//! Fast backend: a single resolver/install invocation (`uv`) against the
//! checked-out tree, no interpreter selection step.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BuildError;

use super::{manifest, ProvisionRequest};

pub struct FastProvisioner {
    timeout: Duration,
}

impl FastProvisioner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn provision(&self, req: &ProvisionRequest<'_>) -> Result<()> {
        tokio::fs::create_dir_all(req.env_dir).await.context("failed to create env dir")?;

        let info = manifest::discover(req.checkout_root).await?;
        let extras = manifest::resolve_install_extras(&info.extras, req.operator_configured_extras);

        let mut cmd = Command::new("uv");
        cmd.arg("venv").arg(req.env_dir);
        run(&mut cmd, self.timeout).await.context("uv venv failed")?;

        let mut sync = Command::new("uv");
        sync.current_dir(req.checkout_root)
            .env("VIRTUAL_ENV", req.env_dir)
            .arg("pip")
            .arg("install")
            .arg("sphinx");

        if info.has_manifest {
            sync.arg(".");
            for extra in &extras {
                sync.arg("--extra").arg(extra);
            }
        } else {
            let requirements = manifest::requirements_file_path(req.checkout_root);
            if requirements.exists() {
                sync.arg("-r").arg(&requirements);
            }
        }

        debug!(extras = ?extras, "fast backend installing dependencies");
        run(&mut sync, self.timeout).await.context("uv pip install failed")?;
        info!("fast backend provisioning complete");
        Ok(())
    }
}

async fn run(cmd: &mut Command, timeout: Duration) -> Result<()> {
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| BuildError::EnvProvisionFailed(e.to_string()))?,
        Err(_) => bail!(BuildError::EnvProvisionFailed("timed out".to_string())),
    };
    if !output.status.success() {
        bail!(BuildError::EnvProvisionFailed(String::from_utf8_lossy(&output.stderr).into_owned()));
    }
    Ok(())
}
