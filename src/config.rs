//! Process configuration, read once at startup from the environment.
//!
//! spec.md §6 assigns editing/persistence of the environment-variable
//! file to an external settings editor; this crate only reads whatever
//! lands in its process environment, the way the teacher reads
//! `SSH_KEY_PATH` directly in `main.rs` rather than parsing it itself.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::EnvManagerKind;

const ENV_DATA_DIR: &str = "DOCSMITH_DATA_DIR";
const ENV_WORKER_COUNT: &str = "DOCSMITH_BUILD_PROCESSES";
const ENV_GIT_TIMEOUT_SECS: &str = "DOCSMITH_GIT_TIMEOUT_SECS";
const ENV_DOC_BUILD_TIMEOUT_SECS: &str = "DOCSMITH_DOC_BUILD_TIMEOUT_SECS";
const ENV_DEFAULT_ENV_MANAGER: &str = "DOCSMITH_DEFAULT_ENV_MANAGER";
const ENV_DEFAULT_INTERPRETER: &str = "DOCSMITH_DEFAULT_INTERPRETER_VERSION";
const ENV_AUTO_BUILD_INTERVAL_SECS: &str = "DOCSMITH_AUTO_BUILD_INTERVAL_SECS";

const DEFAULT_WORKER_COUNT: usize = 5;
const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_DOC_BUILD_TIMEOUT_SECS: u64 = 600;
const DEFAULT_INTERPRETER_VERSION: &str = "3.12";
const DEFAULT_AUTO_BUILD_INTERVAL_SECS: u64 = 60;

/// Everything the core reads from the environment, per spec.md §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub worker_count: usize,
    pub git_timeout: Duration,
    pub doc_build_timeout: Duration,
    pub default_env_manager: EnvManagerKind,
    pub default_interpreter_version: String,
    pub auto_build_interval: Duration,
}

impl Config {
    /// Load configuration from the process environment, falling back to
    /// the documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            data_dir: data_dir_default(),
            worker_count: env_parsed(ENV_WORKER_COUNT, DEFAULT_WORKER_COUNT),
            git_timeout: Duration::from_secs(env_parsed(
                ENV_GIT_TIMEOUT_SECS,
                DEFAULT_GIT_TIMEOUT_SECS,
            )),
            doc_build_timeout: Duration::from_secs(env_parsed(
                ENV_DOC_BUILD_TIMEOUT_SECS,
                DEFAULT_DOC_BUILD_TIMEOUT_SECS,
            )),
            default_env_manager: std::env::var(ENV_DEFAULT_ENV_MANAGER)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(EnvManagerKind::Fast),
            default_interpreter_version: std::env::var(ENV_DEFAULT_INTERPRETER)
                .unwrap_or_else(|_| DEFAULT_INTERPRETER_VERSION.to_string()),
            auto_build_interval: Duration::from_secs(env_parsed(
                ENV_AUTO_BUILD_INTERVAL_SECS,
                DEFAULT_AUTO_BUILD_INTERVAL_SECS,
            )),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn data_dir_default() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    directories::ProjectDirs::from("dev", "docsmith", "docsmith")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./docsmith-data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env::with_vars;

    #[test]
    fn defaults_apply_when_unset() {
        with_vars(
            [
                (ENV_WORKER_COUNT, None::<&str>),
                (ENV_GIT_TIMEOUT_SECS, None),
                (ENV_AUTO_BUILD_INTERVAL_SECS, None),
            ],
            || {
                let cfg = Config::from_env();
                assert_eq!(cfg.worker_count, DEFAULT_WORKER_COUNT);
                assert_eq!(cfg.git_timeout, Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS));
                assert_eq!(
                    cfg.auto_build_interval,
                    Duration::from_secs(DEFAULT_AUTO_BUILD_INTERVAL_SECS)
                );
            },
        );
    }

    #[test]
    fn overrides_are_read() {
        with_vars([(ENV_WORKER_COUNT, Some("9"))], || {
            let cfg = Config::from_env();
            assert_eq!(cfg.worker_count, 9);
        });
    }

    #[test]
    fn unparsable_override_falls_back_to_default() {
        with_vars([(ENV_WORKER_COUNT, Some("not-a-number"))], || {
            let cfg = Config::from_env();
            assert_eq!(cfg.worker_count, DEFAULT_WORKER_COUNT);
        });
    }
}
