//! Fixed-interval status broadcast

use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior, interval};

use aroma_core::Broadcaster;

/// Push one snapshot per `period` until the task is aborted
pub async fn tick_loop(broadcaster: Arc<Broadcaster>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let report = broadcaster.tick().await;
        if report.removed > 0 {
            tracing::debug!("Tick removed {} closed subscribers", report.removed);
        }
        tracing::trace!("Tick delivered to {} subscribers", report.delivered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aroma_core::config::default_fans;
    use aroma_core::{FanController, MockGpio, ServerMessage};

    #[tokio::test(start_paused = true)]
    async fn test_one_snapshot_per_tick() {
        let controller = FanController::new(&default_fans(), Arc::new(MockGpio::new())).unwrap();
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(controller)));
        let mut sub = broadcaster.subscribe().await;

        let task = tokio::spawn(tick_loop(Arc::clone(&broadcaster), Duration::from_secs(1)));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            let msg = sub.recv().await.unwrap();
            assert!(matches!(msg, ServerMessage::FanStatus(_)));
        }
        // First tick is immediate, then one per second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));

        task.abort();
    }
}
