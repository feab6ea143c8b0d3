//! Config loading & validation (C9's non-core half): TOML on disk, `serde`
//! for shape, manual validation for the bits serde types can't express
//! (hex-decodable 16-byte secrets, a 16-byte `ad_tag`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

fn default_true() -> bool {
    true
}
fn default_stats_period() -> u64 {
    600
}
fn default_read_buf() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub prefer_ipv6: bool,
    #[serde(default = "default_true")]
    pub fast_mode: bool,
    #[serde(default = "default_stats_period")]
    pub stats_print_period_secs: u64,
    #[serde(default = "default_read_buf")]
    pub read_buf_size: usize,
    /// Hex-encoded; empty string means middle-proxy advertising is disabled.
    #[serde(default)]
    pub ad_tag: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            prefer_ipv6: false,
            fast_mode: true,
            stats_print_period_secs: default_stats_period(),
            read_buf_size: default_read_buf(),
            ad_tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    pub users: HashMap<String, String>,
    /// Declaration order of `users`, recovered from the raw file text since
    /// `toml`'s default map doesn't preserve it (see SPEC_FULL.md §6.1) —
    /// needed for spec's "first match wins, in insertion order" tie-break.
    #[serde(skip)]
    pub users_order: Vec<String>,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut cfg: ProxyConfig = toml::from_str(raw)
            .map_err(|e| ProxyError::Config(format!("parsing config: {e}")))?;
        cfg.users_order = users_declaration_order(raw, &cfg.users);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.users.is_empty() {
            return Err(ProxyError::Config("users must not be empty".into()));
        }
        for (name, secret) in &self.users {
            decode_secret(secret)
                .map_err(|e| ProxyError::Config(format!("user '{name}': {e}")))?;
        }
        if !self.general.ad_tag.is_empty() {
            let decoded = hex::decode(&self.general.ad_tag)
                .map_err(|e| ProxyError::Config(format!("ad_tag is not valid hex: {e}")))?;
            if decoded.len() != 16 {
                return Err(ProxyError::Config(format!(
                    "ad_tag must decode to 16 bytes, got {}",
                    decoded.len()
                )));
            }
        }
        Ok(())
    }

    /// Users in declaration order, secrets decoded to raw bytes.
    pub fn users_in_order(&self) -> Vec<(String, [u8; 16])> {
        self.users_order
            .iter()
            .filter_map(|name| {
                self.users
                    .get(name)
                    .and_then(|s| decode_secret(s).ok())
                    .map(|secret| (name.clone(), secret))
            })
            .collect()
    }

    pub fn ad_tag_bytes(&self) -> Option<[u8; 16]> {
        if self.general.ad_tag.is_empty() {
            return None;
        }
        let decoded = hex::decode(&self.general.ad_tag).ok()?;
        decoded.try_into().ok()
    }

    pub fn use_middle_proxy(&self) -> bool {
        self.ad_tag_bytes().is_some()
    }
}

fn decode_secret(hex_str: &str) -> std::result::Result<[u8; 16], String> {
    let bytes = hex::decode(hex_str).map_err(|e| format!("secret is not valid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| format!("secret must be 16 bytes, got {}", v.len()))
}

/// Walks the raw TOML text to recover the order `[users]` keys were written
/// in. Tolerant of anything we don't understand — unseen keys are appended
/// in the (unordered) iteration order of the parsed map as a fallback, so a
/// config we can't order perfectly still loads instead of failing to start.
fn users_declaration_order(raw: &str, parsed: &HashMap<String, String>) -> Vec<String> {
    let mut order = Vec::new();
    let mut in_users = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('[') {
            in_users = trimmed.trim_start_matches('[').trim_end_matches(']') == "users";
            continue;
        }
        if !in_users {
            continue;
        }
        if let Some(eq) = trimmed.find('=') {
            let key = trimmed[..eq].trim().trim_matches('"');
            if parsed.contains_key(key) && !order.iter().any(|k| k == key) {
                order.push(key.to_string());
            }
        }
    }
    for key in parsed.keys() {
        if !order.iter().any(|k| k == key) {
            order.push(key.clone());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 443

        [general]
        fast_mode = false
        ad_tag = "00112233445566778899aabbccddeeff"

        [users]
        alice = "00000000000000000000000000000000"
        bob   = "d0b2d55164a0b9bafa4b17c9ac2e3dab"
    "#;

    #[test]
    fn parses_sample_config_and_preserves_user_order() {
        let cfg = ProxyConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.server.port, 443);
        assert!(!cfg.general.fast_mode);
        assert_eq!(cfg.users_in_order()[0].0, "alice");
        assert_eq!(cfg.users_in_order()[1].0, "bob");
        assert!(cfg.use_middle_proxy());
    }

    #[test]
    fn rejects_empty_users() {
        let cfg = "[server]\nport = 443\n[users]\n";
        assert!(ProxyConfig::parse(cfg).is_err());
    }

    #[test]
    fn rejects_bad_secret_length() {
        let cfg = "[server]\nport = 443\n[users]\nalice = \"00\"\n";
        assert!(ProxyConfig::parse(cfg).is_err());
    }

    #[test]
    fn rejects_ad_tag_of_wrong_length() {
        let cfg = "[server]\nport = 443\n[general]\nad_tag = \"00\"\n[users]\nalice = \"00000000000000000000000000000000\"\n";
        assert!(ProxyConfig::parse(cfg).is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = "[server]\nport = 443\n[users]\nalice = \"00000000000000000000000000000000\"\n";
        let cfg = ProxyConfig::parse(cfg).unwrap();
        assert!(cfg.general.fast_mode);
        assert!(!cfg.general.prefer_ipv6);
        assert_eq!(cfg.general.stats_print_period_secs, 600);
        assert_eq!(cfg.general.read_buf_size, 4096);
        assert!(!cfg.use_middle_proxy());
    }
}
