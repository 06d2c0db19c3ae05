use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Fires one tick per period into a channel while running.
///
/// Ticks are never queued: if the consumer falls behind, missed periods are
/// skipped rather than delivered late. Stopping and starting again begins a
/// fresh period.
pub struct SegmentClock {
    task: Option<JoinHandle<()>>,
}

impl SegmentClock {
    pub fn start(period: Duration, ticks: mpsc::Sender<()>) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick resolves immediately; consume it so the first
            // delivered tick lands one full period after start.
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticks.send(()).await.is_err() {
                    break;
                }
            }
        });

        Self { task: Some(task) }
    }

    /// Stop emitting immediately. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SegmentClock {
    fn drop(&mut self) {
        self.stop();
    }
}
