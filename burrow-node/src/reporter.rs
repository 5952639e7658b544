use std::sync::Arc;
use std::time::Duration;

use burrow_core::metrics::TrafficMetrics;
use burrow_core::shutdown::Shutdown;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Log the traffic metrics every `interval` until `shutdown` fires.
pub fn spawn(
    metrics: Arc<TrafficMetrics>,
    interval: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {
                    info!(target: "burrow::traffic", "\n{}", metrics.encode().trim_end());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_shutdown() {
        let metrics = Arc::new(TrafficMetrics::new());
        let shutdown = Shutdown::new();
        let task = spawn(metrics, Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!task.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reporter should stop")
            .unwrap();
    }
}
