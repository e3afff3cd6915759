use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, sync::Arc};

use crate::header::parse_accepted_ids;

#[derive(Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    pub relay: RelayConfig,
}

#[derive(Deserialize)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub allowed_proxy_ips: Option<Vec<String>>,
    pub tls: Option<TlsConfig>,
}

#[derive(Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Clone, Deserialize)]
pub struct RelayConfig {
    /// Comma-separated UUIDs accepted in the handshake header.
    pub client_ids: String,
    pub fallback: Option<FallbackConfig>,
    #[serde(default = "default_doh_url")]
    pub doh_url: String,
    /// When set, dotted-quad destination addresses are rewritten to
    /// `www.<ip>.<suffix>` before dialing (e.g. `sslip.io`).
    pub wildcard_dns_suffix: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct FallbackConfig {
    pub host: String,
    #[serde(default = "default_fallback_port")]
    pub port: u16,
}

fn default_doh_url() -> String {
    "https://cloudflare-dns.com/dns-query".to_string()
}

fn default_fallback_port() -> u16 {
    443
}

/// Immutable per-process relay settings, resolved once from [`RelayConfig`]
/// and shared across sessions behind an `Arc`. Never mutated in place; a
/// reload would build a whole new snapshot.
pub struct RelaySettings {
    pub accepted_ids: Vec<[u8; 16]>,
    pub fallback: Option<FallbackConfig>,
    pub doh_url: String,
    pub wildcard_dns_suffix: Option<String>,
}

impl RelayConfig {
    pub fn resolve(&self) -> Result<Arc<RelaySettings>> {
        let accepted_ids = parse_accepted_ids(&self.client_ids)?;
        Ok(Arc::new(RelaySettings {
            accepted_ids,
            fallback: self.fallback.clone(),
            doh_url: self.doh_url.clone(),
            wildcard_dns_suffix: self.wildcard_dns_suffix.clone(),
        }))
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config as valid TOML")
    }
}

pub fn load_config() -> Result<Config> {
    let content = fs::read_to_string("config.toml").context("Failed to read config.toml file")?;
    Config::from_toml(&content)
}
