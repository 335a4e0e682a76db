//! Proxy configuration

use httpwall_policy::LoadMode;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use url::Url;

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application the proxy protects
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Rule set file
    #[serde(default = "default_policy_path")]
    pub policy_path: String,

    /// How invalid rules are treated at startup
    #[serde(default)]
    pub load_mode: LoadMode,

    /// Largest request body buffered for inspection
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Largest application response buffered for inspection
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Backend request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// Audit events kept in memory
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Identity headers set by an authenticating gateway
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Values given on the command line or through `HTTPWALL_*` variables
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub backend_url: Option<String>,
    pub policy_path: Option<String>,
    pub max_body_bytes: Option<usize>,
    pub load_mode: Option<LoadMode>,
}

impl ProxyConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, overrides: &Overrides) -> anyhow::Result<Self> {
        // Try to load from file, or use defaults
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Some(listen) = &overrides.listen {
            config.listen = listen.clone();
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(backend) = &overrides.backend_url {
            config.backend_url = backend.clone();
        }
        if let Some(policy) = &overrides.policy_path {
            config.policy_path = policy.clone();
        }
        if let Some(limit) = overrides.max_body_bytes {
            config.max_body_bytes = limit;
        }
        if let Some(mode) = overrides.load_mode {
            config.load_mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> anyhow::Result<()> {
        let backend = Url::parse(&self.backend_url)
            .map_err(|e| anyhow::anyhow!("invalid backend_url '{}': {}", self.backend_url, e))?;
        if !matches!(backend.scheme(), "http" | "https") {
            anyhow::bail!("backend_url scheme '{}' is not http or https", backend.scheme());
        }
        if backend.host_str().is_none() {
            anyhow::bail!("backend_url '{}' has no host", self.backend_url);
        }
        if self.max_body_bytes == 0 || self.max_response_bytes == 0 {
            anyhow::bail!("body limits must be greater than zero");
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.listen, self.port).parse()?)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            backend_url: default_backend_url(),
            policy_path: default_policy_path(),
            load_mode: LoadMode::default(),
            max_body_bytes: default_max_body_bytes(),
            max_response_bytes: default_max_response_bytes(),
            backend_timeout_secs: default_backend_timeout(),
            audit_capacity: default_audit_capacity(),
            identity: IdentityConfig::default(),
        }
    }
}

/// Trusted identity headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Map identity headers to a user for role checks
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Comma-separated role list
    #[serde(default = "default_roles_header")]
    pub roles_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user_header: default_user_header(),
            roles_header: default_roles_header(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backend_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_policy_path() -> String {
    "./policies/default.yaml".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_response_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_audit_capacity() -> usize {
    10_000
}

fn default_user_header() -> String {
    "x-authenticated-user".to_string()
}

fn default_roles_header() -> String {
    "x-authenticated-roles".to_string()
}
