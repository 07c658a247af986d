//! Periodic application-level `ping` frames.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use watchtower_protocol::ControlFrame;

use crate::transport::StreamError;

/// Outbound control channel used by the heartbeat.
pub trait FrameSender: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send(&self, frame: &ControlFrame) -> Result<(), StreamError>;
}

/// Owns the repeating ping task. At most one task runs at a time; starting
/// again replaces the previous one.
pub struct HeartbeatMonitor {
    interval: Duration,
    task: Mutex<Option<CancellationToken>>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: Mutex::new(None),
        }
    }

    /// Starts pinging through `sender`, replacing any running task.
    pub fn start(&self, sender: Arc<dyn FrameSender>) {
        let cancel = CancellationToken::new();
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        tokio::spawn(heartbeat_pump(self.interval, sender, cancel));
        debug!(interval_ms = self.interval.as_millis() as u64, "heartbeat started");
    }

    /// Stops the ping task. Safe to call when not running.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(cancel) = task {
            cancel.cancel();
            debug!("heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn heartbeat_pump(
    period: Duration,
    sender: Arc<dyn FrameSender>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => tick(sender.as_ref()),
        }
    }
}

/// One heartbeat tick. A tick while disconnected does nothing.
pub(crate) fn tick(sender: &dyn FrameSender) {
    if !sender.is_connected() {
        trace!("heartbeat tick while disconnected");
        return;
    }
    if let Err(e) = sender.send(&ControlFrame::Ping) {
        debug!(error = %e, "heartbeat ping not sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSender {
        connected: AtomicBool,
        sent: AtomicUsize,
    }

    impl FrameSender for FakeSender {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, frame: &ControlFrame) -> Result<(), StreamError> {
            assert_eq!(frame, &ControlFrame::Ping);
            if !self.is_connected() {
                return Err(StreamError::NotConnected);
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn tick_while_disconnected_sends_nothing() {
        let sender = FakeSender::default();
        tick(&sender);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tick_while_connected_sends_ping() {
        let sender = FakeSender::default();
        sender.connected.store(true, Ordering::SeqCst);
        tick(&sender);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_each_interval_until_stopped() {
        let sender = Arc::new(FakeSender::default());
        sender.connected.store(true, Ordering::SeqCst);
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));

        monitor.start(sender.clone());
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 3);

        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_task() {
        let sender = Arc::new(FakeSender::default());
        sender.connected.store(true, Ordering::SeqCst);
        let monitor = HeartbeatMonitor::new(Duration::from_secs(10));

        monitor.start(sender.clone());
        monitor.start(sender.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        // Two live tasks would have sent four pings.
        assert_eq!(sender.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_while_disconnected_are_silent() {
        let sender = Arc::new(FakeSender::default());
        let monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        monitor.start(sender.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert!(monitor.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(1));
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
