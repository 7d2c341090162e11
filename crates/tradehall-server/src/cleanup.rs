use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tradehall_db::Database;

/// Background task that prunes friend requests nobody answered.
///
/// Runs on an interval and deletes pending requests older than `ttl_days`,
/// across every recipient.
pub async fn run_cleanup_loop(db: Arc<Database>, ttl_days: i64, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let cutoff = chrono::Utc::now() - chrono::Duration::days(ttl_days);
        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.cleanup_stale_requests(cutoff)).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Cleanup: pruned {} stale friend requests", count);
                }
            }
            Ok(Err(e)) => warn!("Cleanup error: {}", e),
            Err(e) => warn!("Cleanup task failed: {}", e),
        }
    }
}
