//! Closed error kinds for a build job (spec §7), plus the internal
//! `anyhow`-based propagation used while a build is still in flight.

use thiserror::Error;

/// The disposition-bearing error kinds a build job can terminate with.
///
/// Internal plumbing (git, provisioner, executor steps) returns
/// `anyhow::Result` so call sites can attach context freely; only at the
/// point a job's terminal status is persisted does the error get
/// downcast or mapped into one of these kinds for storage and logging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("auth material invalid: {0}")]
    AuthMaterialInvalid(String),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("git operation timed out after {0:?}")]
    GitTimeout(std::time::Duration),

    #[error("environment provisioning failed: {0}")]
    EnvProvisionFailed(String),

    #[error("documentation build failed: {0}")]
    DocBuildFailed(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("interrupted at startup")]
    InterruptedAtStartup,
}

impl BuildError {
    /// Stable short name used for the `builds.error_kind` column and log
    /// fields, independent of the (potentially long) display message.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BuildError::AuthMaterialInvalid(_) => "AuthMaterialInvalid",
            BuildError::RefNotFound(_) => "RefNotFound",
            BuildError::GitTimeout(_) => "GitTimeout",
            BuildError::EnvProvisionFailed(_) => "EnvProvisionFailed",
            BuildError::DocBuildFailed(_) => "DocBuildFailed",
            BuildError::PublishFailed(_) => "PublishFailed",
            BuildError::InterruptedAtStartup => "InterruptedAtStartup",
        }
    }
}

/// Walk an `anyhow::Error`'s source chain looking for a `BuildError` any
/// step attached via `.context()`/`From`. Falls back to `DocBuildFailed`
/// with the top-level message so every job always gets a concrete kind.
pub fn classify(err: &anyhow::Error) -> BuildError {
    for cause in err.chain() {
        if let Some(build_err) = cause.downcast_ref::<BuildError>() {
            return build_err.clone();
        }
    }
    BuildError::DocBuildFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_finds_nested_build_error() {
        let root = anyhow::Error::new(BuildError::RefNotFound("main".into()));
        let wrapped = root.context("checkout step failed");
        assert_eq!(classify(&wrapped), BuildError::RefNotFound("main".into()));
    }

    #[test]
    fn classify_falls_back_to_doc_build_failed() {
        let err = anyhow::anyhow!("something went sideways");
        match classify(&err) {
            BuildError::DocBuildFailed(msg) => assert!(msg.contains("sideways")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn kind_name_is_stable() {
        assert_eq!(BuildError::InterruptedAtStartup.kind_name(), "InterruptedAtStartup");
    }
}
