//! Hot-reload: watches the config file and reloads it on SIGHUP (Unix) or on
//! a periodic timer (all platforms).
//!
//! # What can be reloaded without restart
//!
//! | Field                              | Effect                              |
//! |-------------------------------------|---------------------------------------|
//! | `users`                            | Applied on next accepted connection   |
//! | `general.ad_tag`                    | Applied on next accepted connection   |
//! | `general.fast_mode`                 | Applied on next accepted connection   |
//! | `general.stats_print_period_secs`   | Picked up by the next sleep cycle     |
//! | `general.read_buf_size`             | Applied on next accepted connection   |
//!
//! `server.port` and `general.prefer_ipv6` require re-binding listeners and
//! are **not** applied; a warning is logged instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config_rx = spawn_config_watcher(
//!     PathBuf::from("config.toml"),
//!     Arc::new(initial_config),
//!     Duration::from_secs(60),
//! );
//!
//! // In each accept loop, get a fresh snapshot per connection:
//! let config = config_rx.borrow().clone();
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::load::ProxyConfig;

fn warn_non_hot_changes(old: &ProxyConfig, new: &ProxyConfig) {
    if old.server.port != new.server.port {
        warn!(
            "config reload: server.port changed ({} -> {}); restart required",
            old.server.port, new.server.port
        );
    }
    if old.general.prefer_ipv6 != new.general.prefer_ipv6 {
        warn!("config reload: general.prefer_ipv6 changed; restart required");
    }
}

fn log_hot_changes(old: &ProxyConfig, new: &ProxyConfig) {
    if old.general.fast_mode != new.general.fast_mode {
        info!(
            "config reload: fast_mode: {} -> {}",
            old.general.fast_mode, new.general.fast_mode
        );
    }
    if old.general.ad_tag != new.general.ad_tag {
        info!("config reload: ad_tag changed (middle-proxy advertising toggled)");
    }
    if old.general.stats_print_period_secs != new.general.stats_print_period_secs {
        info!(
            "config reload: stats_print_period_secs: {} -> {}",
            old.general.stats_print_period_secs, new.general.stats_print_period_secs
        );
    }
    if old.general.read_buf_size != new.general.read_buf_size {
        info!(
            "config reload: read_buf_size: {} -> {}",
            old.general.read_buf_size, new.general.read_buf_size
        );
    }

    if old.users != new.users {
        let added: Vec<&String> = new
            .users
            .keys()
            .filter(|u| !old.users.contains_key(*u))
            .collect();
        let removed: Vec<&String> = old
            .users
            .keys()
            .filter(|u| !new.users.contains_key(*u))
            .collect();
        let changed: Vec<&String> = new
            .users
            .keys()
            .filter(|u| old.users.get(*u).is_some_and(|old_s| old_s != &new.users[*u]))
            .collect();

        if !added.is_empty() {
            info!("config reload: users added: {:?}", added);
        }
        if !removed.is_empty() {
            info!("config reload: users removed: {:?}", removed);
        }
        if !changed.is_empty() {
            info!("config reload: users with changed secrets: {:?}", changed);
        }
    }
}

/// Spawn the hot-reload watcher task. Returns a receiver every accept loop
/// should call `.borrow().clone()` on per accepted connection.
pub fn spawn_config_watcher(
    config_path: PathBuf,
    initial: Arc<ProxyConfig>,
    reload_interval: Duration,
) -> watch::Receiver<Arc<ProxyConfig>> {
    let (config_tx, config_rx) = watch::channel(initial);

    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sighup = {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("failed to register SIGHUP handler: {e}");
                    None
                }
            }
        };

        let mut interval = tokio::time::interval(reload_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            #[cfg(unix)]
            {
                if let Some(sighup) = sighup.as_mut() {
                    tokio::select! {
                        _ = interval.tick() => {},
                        _ = sighup.recv() => {
                            info!("SIGHUP received, reloading config from {:?}", config_path);
                        }
                    }
                } else {
                    interval.tick().await;
                }
            }
            #[cfg(not(unix))]
            interval.tick().await;

            let new_cfg = match ProxyConfig::load(&config_path) {
                Ok(c) => c,
                Err(e) => {
                    error!("config reload: failed to load {:?}: {e}", config_path);
                    continue;
                }
            };

            let old_cfg = config_tx.borrow().clone();
            if old_cfg.server.port == new_cfg.server.port
                && old_cfg.general.prefer_ipv6 == new_cfg.general.prefer_ipv6
                && old_cfg.general.fast_mode == new_cfg.general.fast_mode
                && old_cfg.general.ad_tag == new_cfg.general.ad_tag
                && old_cfg.general.stats_print_period_secs == new_cfg.general.stats_print_period_secs
                && old_cfg.general.read_buf_size == new_cfg.general.read_buf_size
                && old_cfg.users == new_cfg.users
            {
                continue;
            }

            warn_non_hot_changes(&old_cfg, &new_cfg);
            log_hot_changes(&old_cfg, &new_cfg);

            config_tx.send(Arc::new(new_cfg)).ok();
        }
    });

    config_rx
}
