//! The periodic task: catalog refresh and peer liveness, back to back
//! with a pause between, forever after an initial delay.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog;
use crate::driver::Driver;

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub initial_delay: Duration,
    pub pause_after_catalog: Duration,
    pub pause_after_liveness: Duration,
    /// A peer quiet for longer than this gets a liveness PING.
    pub stale_after: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            pause_after_catalog: Duration::from_secs(30),
            pause_after_liveness: Duration::from_secs(20),
            stale_after: Duration::from_secs(60),
        }
    }
}

pub async fn run_timer(driver: Arc<Driver>, config: TimerConfig) {
    tokio::time::sleep(config.initial_delay).await;
    while driver.is_running() {
        refresh_catalog(&driver).await;
        tokio::time::sleep(config.pause_after_catalog).await;
        if !driver.is_running() {
            break;
        }
        ping_stale_peers(&driver, config.stale_after);
        tokio::time::sleep(config.pause_after_liveness).await;
    }
    tracing::debug!("timer stopped");
}

/// Re-derive the catalog from disk; on any difference (count or
/// composition) swap it in and broadcast a fresh ACTIVE. Read errors
/// keep the cached catalog for this cycle.
pub async fn refresh_catalog(driver: &Arc<Driver>) {
    let scanned = match catalog::scan(driver.news_dir()) {
        Ok(scanned) => scanned,
        Err(error) => {
            tracing::warn!(%error, "catalog scan failed, keeping the cached catalog");
            return;
        }
    };
    let local = driver.directory().local();
    let changed = scanned.len() != local.total_docs || scanned != local.catalog;
    if !changed {
        return;
    }
    let total = scanned.len();
    driver.directory().replace_local_catalog(scanned);
    driver
        .display()
        .log(&format!("catalog reloaded, {total} documents"));
    driver.send_active(None, driver.broadcast()).await;
}

/// Reliable PING to every peer that has been quiet too long; the retry
/// engine evicts the ones that never answer.
pub fn ping_stale_peers(driver: &Arc<Driver>, stale_after: Duration) {
    for peer in driver.directory().peers() {
        if peer.last_seen.elapsed() >= stale_after {
            tracing::debug!(peer = %peer.name, "quiet peer, checking liveness");
            driver.ping_peer(peer.addr);
        }
    }
}
