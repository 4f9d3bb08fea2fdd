use std::sync::Arc;
use std::time::Duration;

use hw_db::Repository;
use tokio::task::JoinHandle;

/// Spawn the background task that drops expired records every `interval`.
pub fn spawn_sweeper(repo: Arc<dyn Repository>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match repo.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "expired records purged"),
                Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
            }
        }
    })
}
