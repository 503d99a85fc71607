use anyhow::{Context, Result};
use std::path::Path;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_TUNNEL_PORT: u16 = 2222;
pub const SCRIPTS_DIR: &str = "./scripts";

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub chat_id: String,
    pub ssh_port: u16,
    pub tunnel_port: u16,
    pub tunnel_service: String,
    pub ngrok_authtoken: Option<String>,
}

impl Config {
    /// Merge the optional env file into the process environment, then build
    /// the configuration record from it. The environment always wins over
    /// the file; `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` are mandatory.
    pub fn load(env_file: &Path) -> Result<Self> {
        merge_env_file(env_file);

        Ok(Self {
            bot_token: require_env("TELEGRAM_BOT_TOKEN")?,
            chat_id: require_env("TELEGRAM_CHAT_ID")?,
            ssh_port: env_port("SSH_PORT", DEFAULT_SSH_PORT),
            tunnel_port: env_port("TUNNEL_PORT", DEFAULT_TUNNEL_PORT),
            tunnel_service: optional_env("TUNNEL_SERVICE").unwrap_or_else(|| "ngrok".to_string()),
            ngrok_authtoken: optional_env("NGROK_AUTHTOKEN"),
        })
    }
}

/// Export `KEY=VALUE` lines from the file into the process environment,
/// skipping blanks, `#` comments, malformed lines, and keys that are
/// already set.
fn merge_env_file(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        // No env file; run on the process environment alone.
        return;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if std::env::var(key).map_or(true, |v| v.is_empty()) {
            std::env::set_var(key, value.trim());
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn require_env(key: &str) -> Result<String> {
    optional_env(key)
        .with_context(|| format!("{} is required (set it in the environment or .env)", key))
}

fn env_port(key: &str, default: u16) -> u16 {
    optional_env(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
