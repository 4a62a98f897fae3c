//! Broker configuration loaded from environment variables.
//!
//! Every setting has a default so the broker starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use ghostshare_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`, or `PORT` to bind all interfaces on that port.
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Origins allowed by CORS. Empty means any origin.
    /// Env: `ALLOWED_ORIGINS` (comma separated)
    pub allowed_origins: Vec<String>,

    /// Directory holding a built web client to serve next to the broker.
    /// Env: `STATIC_DIR`
    /// Default: unset (no static files).
    pub static_dir: Option<PathBuf>,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            allowed_origins: Vec::new(),
            static_dir: None,
            instance_name: "GhostShare Broker".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        if let Some(dir) = lookup("STATIC_DIR") {
            if !dir.trim().is_empty() {
                config.static_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        config
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
