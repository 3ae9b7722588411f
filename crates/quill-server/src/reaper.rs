//! Background disposal of idle agents.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;

/// Shortest sweep period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn a task that disposes agents idle for longer than `threshold`,
/// checking every `interval` until `cancel` fires.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = registry.reap_idle(threshold, Utc::now()).await;
                    if reaped > 0 {
                        tracing::info!(reaped, remaining = registry.len(), "Reaped idle agents");
                    }
                }
            }
        }

        tracing::debug!("Reaper stopped");
    })
}
