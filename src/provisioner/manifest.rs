//! Manifest parsing: interpreter-version constraints and extras
//! discovery across the three locations spec.md §4.2 names.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const MANIFEST_FILE: &str = "pyproject.toml";
const VERSION_FILE: &str = ".python-version";
const REQUIREMENTS_FILE: &str = "requirements.txt";

#[derive(Debug, Deserialize, Default)]
struct PyProject {
    #[serde(default)]
    project: Option<ProjectTable>,
    #[serde(default)]
    tool: Option<ToolTable>,
    #[serde(rename = "dependency-groups", default)]
    dependency_groups: Option<toml::value::Table>,
}

#[derive(Debug, Deserialize, Default)]
struct ProjectTable {
    #[serde(rename = "requires-python", default)]
    requires_python: Option<String>,
    #[serde(rename = "optional-dependencies", default)]
    optional_dependencies: Option<toml::value::Table>,
}

#[derive(Debug, Deserialize, Default)]
struct ToolTable {
    /// Legacy extras table some package managers nest under
    /// `[tool.<name>.extras]`; we accept any tool namespace that has one.
    #[serde(flatten, default)]
    namespaces: std::collections::BTreeMap<String, toml::Value>,
}

/// What a manifest contributed toward a build: a Python version
/// constraint (if any) and the union of discovered extras names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestInfo {
    pub requires_python: Option<String>,
    pub extras: BTreeSet<String>,
    pub has_manifest: bool,
}

/// Read and merge manifest information from the checkout root. Never
/// fails on a missing or partially-unparsable manifest; extras discovery
/// degrades to an empty set and `has_manifest` reports whether a
/// `pyproject.toml` was present at all.
pub async fn discover(checkout_root: &Path) -> Result<ManifestInfo> {
    let manifest_path = checkout_root.join(MANIFEST_FILE);
    let mut info = ManifestInfo::default();

    if manifest_path.exists() {
        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        info.has_manifest = true;
        match toml::from_str::<PyProject>(&raw) {
            Ok(parsed) => {
                if let Some(project) = &parsed.project {
                    info.requires_python = project.requires_python.clone();
                    if let Some(table) = &project.optional_dependencies {
                        info.extras.extend(table.keys().cloned());
                    }
                }
                if let Some(tool) = &parsed.tool {
                    for ns in tool.namespaces.values() {
                        if let Some(extras_table) = ns.get("extras").and_then(|v| v.as_table()) {
                            info.extras.extend(extras_table.keys().cloned());
                        }
                    }
                }
                if let Some(groups) = &parsed.dependency_groups {
                    info.extras.extend(groups.keys().cloned());
                }
            }
            Err(_) => {
                // Malformed manifest: treat as present but contributing nothing,
                // matching "parsed leniently, unknown keys ignored".
            }
        }
    }

    Ok(info)
}

/// Extras actually to install: discovered extras intersected
/// case-insensitively with `{dev, docs}`, plus operator-configured extras
/// verbatim (not filtered), deduplicated.
pub fn resolve_install_extras(
    discovered: &BTreeSet<String>,
    operator_configured: &[String],
) -> BTreeSet<String> {
    let mut result: BTreeSet<String> = discovered
        .iter()
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            lower == "dev" || lower == "docs"
        })
        .cloned()
        .collect();
    result.extend(operator_configured.iter().cloned());
    result
}

pub fn version_file_path(checkout_root: &Path) -> std::path::PathBuf {
    checkout_root.join(VERSION_FILE)
}

pub fn requirements_file_path(checkout_root: &Path) -> std::path::PathBuf {
    checkout_root.join(REQUIREMENTS_FILE)
}

pub fn has_manifest(checkout_root: &Path) -> bool {
    checkout_root.join(MANIFEST_FILE).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovers_pep621_optional_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"
            [project]
            requires-python = ">=3.11"
            [project.optional-dependencies]
            docs = ["sphinx"]
            dev = ["pytest"]
            "#,
        )
        .await
        .unwrap();

        let info = discover(dir.path()).await.unwrap();
        assert_eq!(info.requires_python.as_deref(), Some(">=3.11"));
        assert!(info.extras.contains("docs"));
        assert!(info.extras.contains("dev"));
    }

    #[tokio::test]
    async fn union_across_sources_is_order_independent_and_deduped() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"
            [project.optional-dependencies]
            docs = ["sphinx"]

            [tool.legacy]
            [tool.legacy.extras]
            docs = ["sphinx-old"]
            test = ["pytest"]

            [dependency-groups]
            dev = ["pytest"]
            "#,
        )
        .await
        .unwrap();

        let info = discover(dir.path()).await.unwrap();
        assert_eq!(info.extras, BTreeSet::from(["docs".to_string(), "test".to_string(), "dev".to_string()]));
    }

    #[tokio::test]
    async fn missing_manifest_yields_empty_info() {
        let dir = tempfile::tempdir().unwrap();
        let info = discover(dir.path()).await.unwrap();
        assert!(!info.has_manifest);
        assert!(info.extras.is_empty());
    }

    #[tokio::test]
    async fn requirements_file_is_visible_when_no_manifest_present() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(REQUIREMENTS_FILE), "sphinx==7.0\n").await.unwrap();

        let info = discover(dir.path()).await.unwrap();
        assert!(!info.has_manifest);
        assert!(requirements_file_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn malformed_manifest_is_treated_as_present_but_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(MANIFEST_FILE), "not = [valid toml").await.unwrap();

        let info = discover(dir.path()).await.unwrap();
        assert!(info.has_manifest);
        assert!(info.extras.is_empty());
        assert!(info.requires_python.is_none());
    }

    #[test]
    fn resolve_extras_intersects_case_insensitively_and_adds_operator_configured() {
        let discovered = BTreeSet::from(["DOCS".to_string(), "test".to_string()]);
        let resolved = resolve_install_extras(&discovered, &["perf".to_string()]);
        assert_eq!(resolved, BTreeSet::from(["DOCS".to_string(), "perf".to_string()]));
    }
}
