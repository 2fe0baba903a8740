use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough commits pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match engine.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            metrics::counter!(crate::observability::COMPACTIONS_TOTAL, "status" => "error")
                .increment(1);
            tracing::error!("compaction failed: {e}");
            false
        }
    }
}
