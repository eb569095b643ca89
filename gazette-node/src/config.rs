//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Node configuration. File: ~/.config/gazette/config.toml or
/// /etc/gazette/config.toml. Env overrides: GAZETTE_PORT,
/// GAZETTE_NEWS_DIR, GAZETTE_BROADCAST.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port for the protocol (default 7355).
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Directory holding the news documents.
    #[serde(default = "default_news_dir")]
    pub news_dir: PathBuf,
    /// Broadcast address of the local segment.
    #[serde(default = "default_broadcast")]
    pub broadcast: String,
}

fn default_udp_port() -> u16 {
    7355
}

fn default_news_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".gazette/news"),
        None => PathBuf::from("news"),
    }
}

fn default_broadcast() -> String {
    "255.255.255.255".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            news_dir: default_news_dir(),
            broadcast: default_broadcast(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_else(Config::default);
    if let Ok(s) = std::env::var("GAZETTE_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.udp_port = p;
        }
    }
    if let Ok(s) = std::env::var("GAZETTE_NEWS_DIR") {
        c.news_dir = PathBuf::from(s);
    }
    if let Ok(s) = std::env::var("GAZETTE_BROADCAST") {
        c.broadcast = s;
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/gazette/config.toml"));
    }
    out.push(PathBuf::from("/etc/gazette/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
