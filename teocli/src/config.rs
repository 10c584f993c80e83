//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use teol0_core::{ConnectionConfig, TransportKind, MAX_PACKET_SIZE};

use crate::client::ClientSettings;

/// Client configuration. File: ~/.config/teocli/config.toml or /etc/teocli/config.toml.
/// Env overrides: TEOCLI_SERVER, TEOCLI_PORT, TEOCLI_TRANSPORT, TEOCLI_CLIENT_NAME, TEOCLI_LOG.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// L0 server host name or address (default localhost).
    #[serde(default = "default_server")]
    pub server: String,
    /// L0 server port (default 9010).
    #[serde(default = "default_port")]
    pub port: u16,
    /// "tcp" or "trudp".
    #[serde(default)]
    pub transport: TransportKind,
    /// Name sent in the login packet.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_max_frame_size")]
    pub send_capacity: usize,
    /// Longest single wait of the event loop.
    #[serde(default = "default_event_loop_timeout_ms")]
    pub event_loop_timeout_ms: u64,
    /// Echo period in repeat mode.
    #[serde(default = "default_echo_interval_ms")]
    pub echo_interval_ms: u64,
    /// Default tracing filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Shared secret enabling payload encryption.
    #[serde(default)]
    pub session_secret: Option<String>,
}

fn default_server() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    9010
}
fn default_client_name() -> String {
    "teocli".to_string()
}
fn default_max_frame_size() -> usize {
    MAX_PACKET_SIZE
}
fn default_event_loop_timeout_ms() -> u64 {
    50
}
fn default_echo_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            transport: TransportKind::default(),
            client_name: default_client_name(),
            max_frame_size: default_max_frame_size(),
            send_capacity: default_max_frame_size(),
            event_loop_timeout_ms: default_event_loop_timeout_ms(),
            echo_interval_ms: default_echo_interval_ms(),
            log_level: default_log_level(),
            session_secret: None,
        }
    }
}

impl Config {
    /// Apply TEOCLI_* overrides. Unparsable values are ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("TEOCLI_SERVER") {
            self.server = s;
        }
        if let Some(p) = var("TEOCLI_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.port = p;
        }
        if let Some(t) = var("TEOCLI_TRANSPORT").and_then(|s| s.parse::<TransportKind>().ok()) {
            self.transport = t;
        }
        if let Some(s) = var("TEOCLI_CLIENT_NAME") {
            self.client_name = s;
        }
        if let Some(s) = var("TEOCLI_LOG") {
            self.log_level = s;
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            identity: self.client_name.clone(),
            transport: self.transport,
            max_frame_size: self.max_frame_size,
            send_capacity: self.send_capacity,
            auto_login: true,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            server: self.server.clone(),
            port: self.port,
            connection: self.connection_config(),
            event_loop_timeout: Duration::from_millis(self.event_loop_timeout_ms),
            session_secret: self.session_secret.clone(),
        }
    }

    pub fn echo_interval(&self) -> Duration {
        Duration::from_millis(self.echo_interval_ms)
    }
}

/// Load config: merge default, then config file (explicit path, else the first one present),
/// then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => read_file(&p)?,
            None => Config::default(),
        },
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/teocli/config.toml"));
    }
    out.push(PathBuf::from("/etc/teocli/config.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("can't read config {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("invalid config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str(
            r#"
            server = "l0.example.net"
            transport = "trudp"
            session_secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(c.server, "l0.example.net");
        assert_eq!(c.transport, TransportKind::ReliableDatagram);
        assert_eq!(c.port, 9010);
        assert_eq!(c.max_frame_size, MAX_PACKET_SIZE);
        assert_eq!(c.session_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
        assert!(toml::from_str::<Config>("transport = \"sctp\"").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("TEOCLI_SERVER", "10.0.0.1"),
            ("TEOCLI_PORT", "9100"),
            ("TEOCLI_TRANSPORT", "trudp"),
            ("TEOCLI_CLIENT_NAME", "C3"),
            ("TEOCLI_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.server, "10.0.0.1");
        assert_eq!(c.port, 9100);
        assert_eq!(c.transport, TransportKind::ReliableDatagram);
        assert_eq!(c.client_name, "C3");
        assert_eq!(c.log_level, "debug");
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut c = Config::default();
        c.apply_env(|k| (k == "TEOCLI_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(c.port, 9010);
    }

    #[test]
    fn settings_carry_identity() {
        let mut c = Config::default();
        c.client_name = "C3".into();
        c.event_loop_timeout_ms = 20;
        let s = c.client_settings();
        assert_eq!(s.connection.identity, "C3");
        assert!(s.connection.auto_login);
        assert_eq!(s.event_loop_timeout, Duration::from_millis(20));
    }
}
