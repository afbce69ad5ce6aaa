/// Configuration loading: TOML on disk, validated once at startup, published
/// into a process-wide swappable cell so later call sites don't thread a
/// `&Config` through everything. Mirrors the teacher's own `ArcSwap` +
/// `once_cell::Lazy` config pattern; this version never calls `.store()`
/// again after startup (no hot-reload, see Non-goals), but keeping the cell
/// is what would let a future reload signal change that without touching
/// every call site.
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_derive::Deserialize;

use crate::errors::Error;

/// Longer keys are truncated at load time; see `ServerConfig::load`.
pub const MAX_KEY_LEN: usize = 256;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default = "default_server_port")]
    pub port: String,
    pub key: String,
}

fn default_server_address() -> String {
    "0.0.0.0".into()
}

fn default_server_port() -> String {
    "1205".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirConfig {
    #[serde(default = "default_redir_address")]
    pub address: String,
    #[serde(default = "default_redir_port")]
    pub port: String,
}

fn default_redir_address() -> String {
    "127.0.0.1".into()
}

fn default_redir_port() -> String {
    "1081".into()
}

impl Default for RedirConfig {
    fn default() -> Self {
        RedirConfig {
            address: default_redir_address(),
            port: default_redir_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redir: RedirConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Config {
    /// Parse and validate. Truncates any key longer than `MAX_KEY_LEN` by
    /// copying its prefix into a new `String` -- the source's in-place
    /// truncation of the config string is deliberately not reproduced.
    pub fn parse(raw: &str) -> Result<Config, Error> {
        let mut config: Config =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;

        if config.servers.is_empty() {
            return Err(Error::Config("no servers configured".into()));
        }

        for server in &mut config.servers {
            if server.key.is_empty() {
                return Err(Error::Config(format!(
                    "server {}:{} is missing a key",
                    server.address, server.port
                )));
            }
            if server.key.len() > MAX_KEY_LEN {
                // `truncate` panics unless the split point falls on a char
                // boundary, so walk back from the byte cap to the nearest one
                // rather than truncating by character count (which can land
                // well past MAX_KEY_LEN bytes for multi-byte input).
                let mut boundary = MAX_KEY_LEN;
                while !server.key.is_char_boundary(boundary) {
                    boundary -= 1;
                }
                server.key.truncate(boundary);
            }
        }

        Ok(config)
    }
}

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| {
    ArcSwap::from_pointee(Config {
        redir: RedirConfig::default(),
        servers: Vec::new(),
    })
});

/// Publish `config` as the process-wide configuration. Called once, from
/// `main`, before the listener binds.
pub fn set_config(config: Config) {
    CONFIG.store(Arc::new(config));
}

/// Clone of the currently published configuration.
pub fn get_config() -> Arc<Config> {
    CONFIG.load_full()
}
