//! Broker and proxy configuration.
//!
//! Loaded from a TOML file; the bin crate layers environment/CLI overrides on
//! top. Local provider endpoints are resolved relative to the config file's
//! directory so a config can ship next to its provider scripts.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub stubs: StubConfig,
    /// Agent name to the tool names it is scoped to (`GET /get_tool/{agent}`).
    #[serde(default)]
    pub agents: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Provider endpoints: a `.py`/`.js` script path or an http(s) URL.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Per-provider tool allow-lists, keyed by the provider's announced name.
    /// Providers absent from this map expose every discovered tool.
    #[serde(default)]
    pub allowlists: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Default wall-clock limit when a request omits `timeout`.
    #[serde(default = "default_exec_timeout")]
    pub default_timeout_secs: u64,
    /// Admission cap on concurrently in-flight executions, independent of the
    /// worker-pool size.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Blocking worker threads available for code execution.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

/// Tool names that receive the session identity as an implicit argument.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubConfig {
    /// Injected as `session_id`.
    #[serde(default)]
    pub session_id_tools: Vec<String>,
    /// Injected as `stream_id`.
    #[serde(default)]
    pub stream_id_tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Host the backend broker instances listen on.
    #[serde(default = "default_backend_host")]
    pub backend_host: String,
    /// First port of the contiguous backend range.
    #[serde(default = "default_broker_port")]
    pub backend_start_port: u16,
    /// Number of backend broker instances (N).
    #[serde(default = "default_backend_count")]
    pub backend_count: usize,
    /// Upstream timeout; generous because event streams are long-lived.
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

impl BrokerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: BrokerConfig = toml::from_str(&raw)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))?;
        if let Some(dir) = path.parent() {
            config.providers.resolve_relative(dir);
        }
        Ok(config)
    }
}

impl ProvidersConfig {
    /// Rewrite relative script paths against `base`. URLs and absolute paths
    /// pass through untouched.
    pub fn resolve_relative(&mut self, base: &Path) {
        for endpoint in &mut self.endpoints {
            if endpoint.starts_with("http") || Path::new(endpoint.as_str()).is_absolute() {
                continue;
            }
            *endpoint = base.join(endpoint.as_str()).to_string_lossy().into_owned();
        }
    }
}

impl StubConfig {
    pub fn injected_key(&self, tool_name: &str) -> Option<&'static str> {
        if self.session_id_tools.iter().any(|t| t == tool_name) {
            Some("session_id")
        } else if self.stream_id_tools.iter().any(|t| t == tool_name) {
            Some("stream_id")
        } else {
            None
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_broker_port(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_exec_timeout(),
            max_concurrent: default_max_concurrent(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_proxy_port(),
            backend_host: default_backend_host(),
            backend_start_port: default_broker_port(),
            backend_count: default_backend_count(),
            timeout_secs: default_proxy_timeout(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    40001
}

fn default_proxy_port() -> u16 {
    30010
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_count() -> usize {
    1
}

fn default_exec_timeout() -> u64 {
    180
}

fn default_max_concurrent() -> usize {
    2000
}

fn default_worker_threads() -> usize {
    64
}

fn default_proxy_timeout() -> u64 {
    36000
}
