use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::WalStore;

/// Background task that periodically expires unpaid holds.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = engine.expire_stale_holds(engine.now()).await;
        if expired > 0 {
            info!(expired, "reaped expired holds");
        } else {
            debug!("reaper tick, nothing expired");
        }
    }
}

/// Background task that compacts the log once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
                debug!(appends, threshold, "compaction triggered");
            }
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
}
