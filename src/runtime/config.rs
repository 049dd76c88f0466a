//! Host configuration
//!
//! Loaded from a JSON file or built from defaults. Saving goes through a
//! temp file and rename so a crash never leaves a half-written config.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// What to do with open channels whose namespace gets disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationPolicy {
    /// Leave the channel open; new calls are still filtered per request.
    #[default]
    Keep,
    /// Tear the channel down.
    Close,
}

/// A UI resource file to register at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSource {
    /// `ui://<namespace>/<path>` identifier
    pub uri: String,
    /// File holding the content
    pub path: PathBuf,
    /// Content type (defaults to the sandboxable UI type)
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Configuration for the session host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Deadline for host-to-client requests, in milliseconds
    pub request_timeout_ms: u64,

    /// Maximum in-flight host-to-client requests per channel
    pub max_pending_requests: usize,

    /// Host-initiated notifications kept for a channel that is not ready yet
    pub notification_buffer: usize,

    /// Policy applied by `revalidate` when a namespace is disconnected
    pub revocation_policy: RevocationPolicy,

    /// Deadline for the courtesy teardown request sent on detach, in milliseconds
    pub teardown_timeout_ms: u64,

    /// Enable debug tracing
    pub debug: bool,

    /// UI resources to load at startup
    pub resources: Vec<ResourceSource>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_pending_requests: 100,
            notification_buffer: 32,
            revocation_policy: RevocationPolicy::Keep,
            teardown_timeout_ms: 1_000,
            debug: false,
            resources: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Request deadline as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Teardown deadline as a duration.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Most verbose level the host logs at.
    pub fn log_level(&self) -> tracing::Level {
        if self.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Reject values the host cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                detail: "must be greater than zero".into(),
            });
        }
        if self.max_pending_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_pending_requests",
                detail: "must be greater than zero".into(),
            });
        }
        if self.teardown_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "teardown_timeout_ms",
                detail: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Load and validate a config file. Missing fields take defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let data = fs::read(path)?;
        let config: HostConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_atomic(path, &data)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> ConfigResult<()> {
    let temp_path = path.with_extension("tmp");
    let failed = |detail: String| ConfigError::AtomicWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::create(&temp_path)
        .map_err(|err| failed(format!("create {:?}: {err}", temp_path)))?;
    file.write_all(data)
        .map_err(|err| failed(format!("write: {err}")))?;
    file.sync_all()
        .map_err(|err| failed(format!("sync: {err}")))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|err| failed(format!("rename {:?}: {err}", temp_path)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new().read(true).open(parent)?;
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_files_take_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("host.json");
        fs::write(&path, br#"{"request_timeout_ms": 500, "revocation_policy": "close"}"#).unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.request_timeout_ms, 500);
        assert_eq!(config.revocation_policy, RevocationPolicy::Close);
        assert_eq!(config.max_pending_requests, 100);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn debug_flag_raises_log_level() {
        let mut config = HostConfig::default();
        assert_eq!(config.log_level(), tracing::Level::INFO);
        config.debug = true;
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("host.json");
        let mut config = HostConfig::default();
        config.resources.push(ResourceSource {
            uri: "ui://flights/app.html".into(),
            path: PathBuf::from("flights.html"),
            mime_type: None,
        });

        config.save(&path).unwrap();
        assert_eq!(HostConfig::load(&path).unwrap(), config);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("host.json");
        fs::write(&path, br#"{"max_pending_requests": 0}"#).unwrap();

        match HostConfig::load(&path) {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "max_pending_requests")
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }
}
