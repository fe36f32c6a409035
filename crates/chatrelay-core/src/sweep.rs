//! Periodic retention sweep over the conversation store.

use std::sync::Arc;
use std::time::Duration;

use chatrelay_storage::ConversationStore;
use tokio::task::JoinHandle;

use crate::notify::Notifier;

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn the daily retention sweep. Conversations idle for longer than
/// `retention_days` are deleted; a notice with the count goes to the sink.
pub fn spawn_retention_sweep(
    store: Arc<ConversationStore>,
    notifier: Arc<Notifier>,
    retention_days: u64,
) -> JoinHandle<()> {
    let ttl = Duration::from_secs(retention_days * 24 * 60 * 60);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // The immediate first tick clears anything that expired while the
        // gateway was down.
        loop {
            interval.tick().await;
            match store.retention_sweep(ttl) {
                Ok(0) => {
                    tracing::debug!("Retention sweep found nothing to delete");
                }
                Ok(deleted) => {
                    tracing::info!(deleted, retention_days, "Retention sweep completed");
                    notifier
                        .send(&format!(
                            "Retention sweep deleted {deleted} conversations older than {retention_days} days"
                        ))
                        .await;
                }
                Err(error) => {
                    tracing::error!(%error, "Retention sweep failed");
                }
            }
        }
    })
}
