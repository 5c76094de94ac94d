//! Pinned backend: select an interpreter version via `pyenv`, then build
//! a conventional virtual environment using that interpreter.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BuildError;

use super::{manifest, ProvisionRequest};

pub struct PinnedProvisioner {
    timeout: Duration,
}

impl PinnedProvisioner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn provision(&self, req: &ProvisionRequest<'_>) -> Result<()> {
        tokio::fs::create_dir_all(req.env_dir).await.context("failed to create env dir")?;

        let info = manifest::discover(req.checkout_root).await?;
        let version = self.resolve_interpreter_version(req, &info).await?;
        debug!(%version, "pinned backend resolved interpreter version");

        let mut install = Command::new("pyenv");
        install.arg("install").arg("--skip-existing").arg(&version);
        run(&mut install, self.timeout).await.context("pyenv install failed")?;

        let interpreter = self.interpreter_path(&version).await?;

        let mut venv = Command::new(&interpreter);
        venv.arg("-m").arg("venv").arg(req.env_dir);
        run(&mut venv, self.timeout).await.context("venv creation failed")?;

        let pip = req.env_dir.join("bin").join("pip");
        let extras = manifest::resolve_install_extras(&info.extras, req.operator_configured_extras);

        let mut install_docs = Command::new(&pip);
        install_docs.arg("install").arg("sphinx");
        run(&mut install_docs, self.timeout).await.context("pip install sphinx failed")?;

        let mut install_project = Command::new(&pip);
        install_project.current_dir(req.checkout_root);
        if info.has_manifest {
            let mut spec = ".".to_string();
            if !extras.is_empty() {
                spec.push('[');
                spec.push_str(&extras.iter().cloned().collect::<Vec<_>>().join(","));
                spec.push(']');
            }
            install_project.arg("install").arg(spec);
        } else {
            let requirements = manifest::requirements_file_path(req.checkout_root);
            if !requirements.exists() {
                info!("no manifest or requirements file found, skipping project install");
                return Ok(());
            }
            install_project.arg("install").arg("-r").arg(&requirements);
        }
        run(&mut install_project, self.timeout).await.context("pip install project failed")?;
        Ok(())
    }

    async fn resolve_interpreter_version(
        &self,
        req: &ProvisionRequest<'_>,
        info: &manifest::ManifestInfo,
    ) -> Result<String> {
        if let Some(constraint) = &info.requires_python {
            if let Some(v) = extract_concrete_version(constraint) {
                return Ok(v);
            }
        }
        let version_file = manifest::version_file_path(req.checkout_root);
        if version_file.exists() {
            let contents = tokio::fs::read_to_string(&version_file).await?;
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
        Ok(req.default_interpreter_version.to_string())
    }

    async fn interpreter_path(&self, version: &str) -> Result<std::path::PathBuf> {
        let mut cmd = Command::new("pyenv");
        cmd.arg("root");
        let output = cmd.output().await.context("pyenv root failed")?;
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(std::path::PathBuf::from(root).join("versions").join(version).join("bin").join("python"))
    }
}

/// A `requires-python` constraint like `>=3.11,<3.13` does not name one
/// concrete version; only a pinned `==3.11.4` style constraint resolves
/// directly. Anything else falls through to the version file / default.
fn extract_concrete_version(constraint: &str) -> Option<String> {
    let trimmed = constraint.trim();
    trimmed.strip_prefix("==").map(|v| v.trim().to_string())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_version_extracted_from_pinned_constraint() {
        assert_eq!(extract_concrete_version("==3.11.4"), Some("3.11.4".to_string()));
    }

    #[test]
    fn range_constraint_yields_no_concrete_version() {
        assert_eq!(extract_concrete_version(">=3.11,<3.13"), None);
    }
}
