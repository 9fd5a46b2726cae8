//! Periodic keepalive timer.

use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Interval between keepalives on a connected channel.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1500);

/// Calls a tick callback at a fixed interval until stopped.
///
/// The first tick fires one interval after start. The callback returns
/// `false` to end the timer from inside.
pub struct KeepAliveMonitor {
    task: JoinHandle<()>,
}

impl KeepAliveMonitor {
    pub fn start<F>(interval: Duration, on_tick: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !on_tick() {
                    debug!("[Session] Keepalive receiver gone, stopping timer");
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let monitor = KeepAliveMonitor::start(KEEPALIVE_INTERVAL, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(3200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        drop(monitor);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_stop_timer() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let monitor = KeepAliveMonitor::start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 1
        });

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!monitor.is_running());
    }
}
