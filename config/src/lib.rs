//! Configuration loading for bridge.
//!
//! The file is TOML:
//!
//! ```toml
//! [server]
//! transport = "launch"            # or "socket" with host/port
//! command = "${JAVA_HOME}/bin/java"
//! args = ["-jar", "analyzer.jar", "--stdio"]
//!
//! [session]
//! request_timeout_ms = 30000
//! shutdown_timeout_ms = 2000
//! heartbeat_interval_ms = 10000
//!
//! [workspace]
//! root = "/home/me/project"
//! name = "project"
//! initialization_options = { sourcePaths = ["src"] }
//! settings = { analyzer = { strict = true } }
//! ```
//!
//! `${VAR}` references in the `[server]` and `[workspace]` string values are
//! expanded from the environment before validation.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_lsp::WorkspaceInfo;
use bridge_types::{SessionSettings, TransportTarget};
use bridge_utils::{PathToUriError, path_to_file_uri};
use serde::Deserialize;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "BRIDGE_CONFIG";

/// Sections whose string values get `${VAR}` expansion.
const EXPANDED_SECTIONS: [&str; 2] = ["server", "workspace"];

const FALLBACK_WORKSPACE_NAME: &str = "workspace";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    WorkspaceRoot(#[from] PathToUriError),
}

#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    /// Where the server lives. Absent means it must come from the command line.
    pub server: Option<TransportTarget>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    pub request_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
}

impl SessionConfig {
    #[must_use]
    pub fn to_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::default()
            .with_request_timeout(self.request_timeout_ms.map(Duration::from_millis))
            .with_heartbeat_interval(self.heartbeat_interval_ms.map(Duration::from_millis));
        if let Some(ms) = self.shutdown_timeout_ms {
            settings = settings.with_shutdown_timeout(Duration::from_millis(ms));
        }
        settings
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct WorkspaceConfig {
    pub root: Option<PathBuf>,
    pub name: Option<String>,
    /// Forwarded verbatim as `initializationOptions`.
    pub initialization_options: Option<serde_json::Value>,
    /// Sent with `workspace/didChangeConfiguration` after the handshake.
    pub settings: Option<serde_json::Value>,
}

impl WorkspaceConfig {
    /// Build the `initialize` identity, rooted at `root` unless one is configured.
    pub fn workspace_info(&self, root: &Path) -> Result<WorkspaceInfo, ConfigError> {
        let root = self.root.as_deref().unwrap_or(root);
        let root_uri = path_to_file_uri(root)?;
        let name = self.name.clone().unwrap_or_else(|| {
            std::path::absolute(root)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| FALLBACK_WORKSPACE_NAME.to_string())
        });
        Ok(WorkspaceInfo {
            root_uri: root_uri.to_string(),
            name,
            initialization_options: self.initialization_options.clone(),
        })
    }
}

/// Replace `${VAR}` with the value of `VAR`, or nothing if it is unset.
///
/// An unterminated `${` is kept as-is.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_strings(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = expand_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(expand_strings),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_strings(v)),
        _ => {}
    }
}

impl BridgeConfig {
    /// Parse a config document, expanding environment references.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let mut table: toml::Table = toml::from_str(content)?;
        for section in EXPANDED_SECTIONS {
            if let Some(value) = table.get_mut(section) {
                expand_strings(value);
            }
        }
        toml::Value::Table(table).try_into()
    }

    /// Load the config file.
    ///
    /// A file named by `explicit` or `$BRIDGE_CONFIG` must exist. The
    /// default location is optional: `Ok(None)` when there is nothing there.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let Some(location) = locate(explicit, env::var_os(CONFIG_ENV), dirs::home_dir()) else {
            tracing::debug!("No config location available");
            return Ok(None);
        };
        Self::load_from(&location)
    }

    fn load_from(location: &ConfigLocation) -> Result<Option<Self>, ConfigError> {
        let path = &location.path;
        if !location.required && !path.exists() {
            tracing::debug!(path = %path.display(), "No config file");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(Some(config))
    }
}

/// A resolved config file and whether it has to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigLocation {
    path: PathBuf,
    required: bool,
}

fn locate(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
    home: Option<PathBuf>,
) -> Option<ConfigLocation> {
    if let Some(path) = explicit {
        return Some(ConfigLocation {
            path: path.to_path_buf(),
            required: true,
        });
    }
    if let Some(path) = env_value.filter(|p| !p.is_empty()) {
        return Some(ConfigLocation {
            path: PathBuf::from(path),
            required: true,
        });
    }
    home.map(|home| ConfigLocation {
        path: home.join(".bridge").join("config.toml"),
        required: false,
    })
}

/// Resolve the config file location: `explicit`, then `$BRIDGE_CONFIG`,
/// then `~/.bridge/config.toml`.
#[must_use]
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    locate(explicit, env::var_os(CONFIG_ENV), dirs::home_dir()).map(|location| location.path)
}
