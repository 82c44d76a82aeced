//! Configuration model.
//!
//! Files are parsed into a [`Value`] tree (TOML or JSON, sniffed) and bound
//! into typed sections by the resolvers in [`bind`]. Binding is strict by
//! default: unknown keys are a boot error, and every boot error is fatal.
//! The engine never starts on a half-understood config.

use std::{num::NonZeroUsize, path::Path};

mod bind;
mod value;

pub use bind::{
    CsrfOptions, EngineConfig, EtagStrategy, FailoverMode, IdentitySource, IpAction,
    IpFilterOptions, PolicyConfig, RateLimitOptions, RoutingOptions, SecurityOptions,
    ServerOptions, SessionOptions, StrategyConfig, TrustedProxyOptions,
};
pub use value::{parse_duration, Value};

// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;

pub const FALLBACK_PARALLELISM: NonZeroUsize = match NonZeroUsize::new(1) {
    Some(n) => n,
    None => unreachable!(),
};

/// Errors raised while loading or binding configuration. All of them are
/// fatal at boot.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("{path}: expected {expected}")]
    InvalidType { path: String, expected: &'static str },
    #[error("{path}: {reason}")]
    InvalidValue { path: String, reason: String },
    #[error("missing required key {path}")]
    Missing { path: String },
    #[error("unknown key {path}")]
    UnknownKey { path: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level application configuration: runtime + listener + engine.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub listener: ListenerConfig,
    pub server: ServerOptions,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = crate::util::file_read(path)
            .await
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_slice(&content)
    }

    pub fn from_slice(content: &[u8]) -> Result<Self, ConfigError> {
        Self::from_value(&Value::from_slice(content)?, true)
    }

    pub fn from_value(root: &Value, strict: bool) -> Result<Self, ConfigError> {
        Ok(AppConfig {
            runtime: RuntimeConfig::from_value(root.get("runtime"), strict)?,
            listener: ListenerConfig::from_value(root.get("listener"))?,
            server: ServerOptions::from_value(root.get("server"), strict)?,
            engine: EngineConfig::from_value(root, strict)?,
        })
    }
}

/// Where the server accepts connections.
#[derive(Debug, Clone)]
pub enum ListenerConfig {
    Socket(std::net::SocketAddr),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl ListenerConfig {
    fn from_value(value: Option<&Value>) -> Result<Self, ConfigError> {
        let Some(value) = value else {
            return Err(ConfigError::Missing {
                path: "listener".into(),
            });
        };
        if let Some(addr) = value.get("socket_addr").and_then(Value::as_str) {
            return addr
                .parse()
                .map(ListenerConfig::Socket)
                .map_err(|_| ConfigError::InvalidValue {
                    path: "listener.socket_addr".into(),
                    reason: format!("invalid socket address {addr:?}"),
                });
        }
        #[cfg(unix)]
        if let Some(path) = value.get("uds_path").and_then(Value::as_str) {
            return Ok(ListenerConfig::Unix(path.into()));
        }
        Err(ConfigError::Missing {
            path: "listener.socket_addr".into(),
        })
    }
}

/// Configuration options for the runtime environment: worker threads, I/O
/// driver selection and io_uring tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub entries: u32,
    pub sqpoll_idle: Option<u32>,
    pub runtime_type: RuntimeType,
    pub cpu_affinity: bool,
}

impl RuntimeConfig {
    fn from_value(value: Option<&Value>, strict: bool) -> Result<Self, ConfigError> {
        let mut section = bind::Section::new("runtime", value, strict)?;
        let runtime_type = match section.str_opt("runtime_type")? {
            None => RuntimeType::default(),
            #[cfg(target_os = "linux")]
            Some("io_uring") => RuntimeType::IoUring,
            Some("legacy") => RuntimeType::Legacy,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    path: "runtime.runtime_type".into(),
                    reason: format!("unknown runtime type {other:?}"),
                })
            }
        };
        let config = RuntimeConfig {
            worker_threads: section.usize_or("worker_threads", default_workers())?,
            entries: section.u32_or("entries", DEFAULT_ENTRIES)?,
            sqpoll_idle: section.u32_opt("sqpoll_idle")?,
            runtime_type,
            cpu_affinity: section.bool_or("cpu_affinity", false)?,
        };
        section.finish()?;
        Ok(config)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: default_workers(),
            entries: DEFAULT_ENTRIES,
            sqpoll_idle: None,
            runtime_type: Default::default(),
            cpu_affinity: false,
        }
    }
}

/// Enum representing different runtime implementation options.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuntimeType {
    /// io_uring-based runtime (Linux only).
    #[cfg(target_os = "linux")]
    IoUring,
    /// Poll-based fallback implementation.
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

impl RuntimeType {
    /// The driver a worker will actually run: an io_uring request degrades
    /// to the poll driver when the kernel lacks support.
    pub fn effective(self) -> RuntimeType {
        #[cfg(target_os = "linux")]
        if self == RuntimeType::IoUring && !monoio::utils::detect_uring() {
            return RuntimeType::Legacy;
        }
        self
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .unwrap_or(FALLBACK_PARALLELISM)
        .into()
}
