//! Resolved configuration types shared across crates.
//!
//! These types represent fully-validated, resolved configuration state.
//! Raw TOML deserialization structs stay private in `bridge-config`, which
//! resolves them into these types at the parse boundary.
//!
//! Existence of a value is the proof of its validity.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Grace period for a launched server to exit after `exit` before it is killed.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("launch command must not be empty")]
    EmptyCommand,
    #[error("socket host must not be empty")]
    EmptyHost,
    #[error("socket port must be non-zero")]
    ZeroPort,
    #[error("invalid socket address {0:?}, expected HOST:PORT")]
    InvalidAddress(String),
}

/// Launch target: an executable plus a fixed argument list.
///
/// Invariant: `program` is non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    program: String,
    args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Result<Self, SettingsError> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(SettingsError::EmptyCommand);
        }
        Ok(Self { program, args })
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Network endpoint of an already-running server.
///
/// Invariant: `host` is non-empty and `port` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
    host: String,
    port: u16,
}

impl SocketEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, SettingsError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if port == 0 {
            return Err(SettingsError::ZeroPort);
        }
        Ok(Self { host, port })
    }

    /// Parse a `HOST:PORT` pair. The port is split at the last colon so
    /// bracket-free IPv6 hosts are not supported.
    pub fn parse(raw: &str) -> Result<Self, SettingsError> {
        let (host, port) = raw
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| SettingsError::InvalidAddress(raw.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| SettingsError::InvalidAddress(raw.to_string()))?;
        Self::new(host, port)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
enum RawTransportTarget {
    Launch {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Socket {
        host: String,
        port: u16,
    },
}

/// Where the remote analysis process lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTransportTarget")]
pub enum TransportTarget {
    /// Spawn the server and talk over its stdin/stdout.
    Launch(LaunchSpec),
    /// Connect to a server already listening on a TCP port.
    Socket(SocketEndpoint),
}

impl TryFrom<RawTransportTarget> for TransportTarget {
    type Error = SettingsError;

    fn try_from(raw: RawTransportTarget) -> Result<Self, Self::Error> {
        match raw {
            RawTransportTarget::Launch { command, args } => {
                LaunchSpec::new(command, args).map(Self::Launch)
            }
            RawTransportTarget::Socket { host, port } => {
                SocketEndpoint::new(host, port).map(Self::Socket)
            }
        }
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch(spec) => write!(f, "launch `{spec}`"),
            Self::Socket(endpoint) => write!(f, "tcp://{endpoint}"),
        }
    }
}

/// Timing policy for one connection.
///
/// `None` timeouts mean "wait forever"; a `None` heartbeat means the `$/ping`
/// extension is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    request_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    heartbeat_interval: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            heartbeat_interval: None,
        }
    }
}

impl SessionSettings {
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval.filter(|d| !d.is_zero());
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }
}
