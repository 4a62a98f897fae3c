//! Client configuration from environment variables.
//!
//! Command line flags override these values in the `ghostshare` binary.

use std::path::PathBuf;

use ghostshare_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_STUN_SERVER, WS_PATH};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling broker.
    /// Env: `SIGNALING_URL`
    pub signaling_url: String,

    /// STUN server handed to the peer transport.
    /// Env: `STUN_SERVER`
    pub stun_server: String,

    /// Directory received files are written to.
    /// Env: `DOWNLOAD_DIR`
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: format!("ws://localhost:{DEFAULT_HTTP_PORT}{WS_PATH}"),
            stun_server: DEFAULT_STUN_SERVER.to_string(),
            download_dir: PathBuf::from("./downloads"),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("SIGNALING_URL") {
            if !url.trim().is_empty() {
                config.signaling_url = normalize_signaling_url(&url);
            }
        }
        if let Some(stun) = lookup("STUN_SERVER") {
            if !stun.trim().is_empty() {
                config.stun_server = stun;
            }
        }
        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            if !dir.trim().is_empty() {
                config.download_dir = PathBuf::from(dir);
            }
        }

        config
    }
}

/// Accept `http(s)://host` as well as `ws(s)://host/ws` and return the
/// WebSocket endpoint URL.
pub fn normalize_signaling_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    let with_scheme = if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else {
        format!("ws://{raw}")
    };

    if with_scheme.ends_with(WS_PATH) {
        with_scheme
    } else {
        format!("{with_scheme}{WS_PATH}")
    }
}
