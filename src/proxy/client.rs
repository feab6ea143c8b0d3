//! Per-connection orchestration: C3 → (C4 | C5) → C6 (spec §4.6).

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::ProxyConfig;
use crate::proxy::handshake::{self, ClientHandshake};
use crate::proxy::{direct_relay, middle_relay, relay};
use crate::stats::StatsRegistry;
use crate::transport::{direct, middle_proxy};

/// Holds the process-wide collaborators a session needs; cheap to clone per
/// accepted connection (everything inside is reference-counted or `Copy`).
///
/// `config` is a hot-reload watch receiver rather than a bare `Arc` so each
/// accepted connection picks up whatever config was current at accept time
/// (see `config::hot_reload`).
#[derive(Clone)]
pub struct ClientHandler {
    config: watch::Receiver<Arc<ProxyConfig>>,
    stats: StatsRegistry,
    my_ip: Option<Ipv4Addr>,
}

impl ClientHandler {
    pub fn new(config: watch::Receiver<Arc<ProxyConfig>>, stats: StatsRegistry, my_ip: Option<Ipv4Addr>) -> Self {
        Self { config, stats, my_ip }
    }

    /// Drives one accepted connection to completion. Any failure before the
    /// relay starts closes the socket silently (spec §4.6).
    pub async fn handle(self, stream: TcpStream) {
        let config = self.config.borrow().clone();
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let users = config.users_in_order();

        let client = match handshake::perform_client_handshake(read_half, write_half, &users).await {
            Ok(hs) => hs,
            Err(e) => {
                debug!("client handshake failed: {e}");
                return;
            }
        };

        self.stats.record_connect(&client.user);
        let span = info_span!("session", user = %client.user, dc_index = client.dc_index);
        self.run_session(client, config).instrument(span).await;
    }

    async fn run_session(&self, client: ClientHandshake, config: Arc<ProxyConfig>) {
        let user = client.user.clone();
        let dc_index = client.dc_index;
        let read_buf_size = config.general.read_buf_size;

        if config.use_middle_proxy() {
            let Some(ad_tag) = config.ad_tag_bytes() else {
                return;
            };
            let Some(my_ip) = self.my_ip else {
                warn!("middle-proxy mode needs a known public IP; dropping session");
                return;
            };
            match middle_proxy::connect_middle_proxy(dc_index, ad_tag, my_ip).await {
                Ok(upstream) => {
                    let (client_halves, upstream_halves) = middle_relay::build_halves(client, upstream);
                    relay::run_session(client_halves, upstream_halves, user, self.stats.clone(), read_buf_size).await;
                }
                Err(e) => debug!("middle-proxy handshake failed: {e}"),
            }
            return;
        }

        let fast_mode = config.general.fast_mode;
        let fast_mode_reuse = fast_mode.then_some(client.enc_key_iv);
        match direct::connect_direct(dc_index, config.general.prefer_ipv6, fast_mode_reuse).await {
            Ok(upstream) => {
                let (client_halves, upstream_halves) = direct_relay::build_halves(client, upstream, fast_mode);
                relay::run_session(client_halves, upstream_halves, user, self.stats.clone(), read_buf_size).await;
            }
            Err(e) => debug!("direct upstream handshake failed: {e}"),
        }
    }
}
