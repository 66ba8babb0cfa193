use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::db::Database;

/// Periodically compact the metadata store.
///
/// Stops for good on the first real error; "nothing to reclaim" just waits
/// for the next tick.
pub fn spawn_compaction(db: Database, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup isn't slowed down
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!("Compaction run");

            let db = db.clone();
            match tokio::task::spawn_blocking(move || db.compact()).await {
                Ok(Ok(true)) => info!("Metadata store compacted"),
                Ok(Ok(false)) => debug!("Nothing to compact"),
                Ok(Err(e)) => {
                    warn!(error = %e, "Compaction failed, stopping maintenance task");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Compaction task aborted, stopping maintenance task");
                    return;
                }
            }
        }
    })
}
