//! Environment provisioning: two backends behind one contract (spec.md
//! §4.2). Both install the documentation generator, the project itself,
//! and the resolved extras subset into `env/`.

pub mod fast;
pub mod manifest;
pub mod pinned;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::domain::EnvManagerKind;

/// Request passed to a provisioner backend for a single build.
pub struct ProvisionRequest<'a> {
    pub checkout_root: &'a Path,
    pub env_dir: &'a Path,
    pub operator_configured_extras: &'a [String],
    pub default_interpreter_version: &'a str,
}

/// One of the two backends spec.md §4.2 describes, behind a single
/// contract. Modeled as an enum rather than a trait object: there are
/// exactly two backends and neither varies at runtime beyond this choice.
pub enum Provisioner {
    Fast(fast::FastProvisioner),
    Pinned(pinned::PinnedProvisioner),
}

impl Provisioner {
    pub fn for_backend(kind: EnvManagerKind, timeout: Duration) -> Self {
        match kind {
            EnvManagerKind::Fast => Provisioner::Fast(fast::FastProvisioner::new(timeout)),
            EnvManagerKind::Pinned => Provisioner::Pinned(pinned::PinnedProvisioner::new(timeout)),
        }
    }

    pub async fn provision(&self, req: &ProvisionRequest<'_>) -> Result<()> {
        match self {
            Provisioner::Fast(p) => p.provision(req).await,
            Provisioner::Pinned(p) => p.provision(req).await,
        }
    }
}
