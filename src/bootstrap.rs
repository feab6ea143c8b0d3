//! Startup collaborators (C9's non-config half): public-IP discovery and the
//! invitation-URL printer. Both are explicitly out of scope as *specified*
//! behavior (spec §1), but the core still needs to call them to get
//! `global_my_ip` and to print something useful on start.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ProxyConfig;

const PUBLIC_IP_ENDPOINT: &str = "https://ifconfig.co/ip";

/// Looks up the proxy's own public IPv4 address. Returns `None` on any
/// failure — the caller disables middle-proxy advertising in that case
/// (spec §6: "Failure disables middle-proxy mode with a log line").
pub async fn discover_public_ip() -> Option<Ipv4Addr> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .ok()?;

    let response = match client.get(PUBLIC_IP_ENDPOINT).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("failed to determine public IP: {e}");
            return None;
        }
    };

    if !response.status().is_success() {
        warn!("public-IP lookup returned status {}", response.status());
        return None;
    }

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            warn!("failed to read public-IP response body: {e}");
            return None;
        }
    };

    match body.trim().parse::<Ipv4Addr>() {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!("public-IP response {:?} was not a valid IPv4 address: {e}", body.trim());
            None
        }
    }
}

/// Logs one `tg://proxy?...` invitation link per configured user, in
/// declaration order (SPEC_FULL.md §6.4).
pub fn print_invitations(config: &ProxyConfig, my_ip: Option<Ipv4Addr>) {
    let host = my_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "YOUR_IP".to_string());
    for name in &config.users_order {
        let Some(secret) = config.users.get(name) else {
            continue;
        };
        info!(
            target: "telemt::links",
            "{name}: tg://proxy?server={host}&port={}&secret={secret}",
            config.server.port
        );
    }
}

/// Resolves `global_my_ip` and, on failure while middle-proxy mode was
/// requested, logs and reports that advertising is disabled.
pub async fn resolve_my_ip(config: &ProxyConfig) -> Option<Ipv4Addr> {
    let ip = discover_public_ip().await;
    if ip.is_none() && config.use_middle_proxy() {
        info!("failed to determine public ip; advertising disabled for this run");
    }
    ip
}
