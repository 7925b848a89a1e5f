use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback run when a session token expires
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot expiry scheduling. At most one callback is pending at a time.
pub trait ExpiryScheduler: Send {
    /// Arm `on_expire` to run after `after`, replacing any pending callback.
    /// A zero or negative delay fires at the next opportunity.
    fn schedule(&mut self, after: Duration, on_expire: ExpiryCallback);

    /// Disarm the pending callback, if any.
    fn cancel(&mut self);
}

/// Expiry timer backed by a sleeping tokio task.
#[derive(Default)]
pub struct ExpiryTimer {
    pending: Option<JoinHandle<()>>,
}

impl ExpiryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl ExpiryScheduler for ExpiryTimer {
    fn schedule(&mut self, after: Duration, on_expire: ExpiryCallback) {
        self.cancel();

        let delay = after.to_std().unwrap_or(std::time::Duration::ZERO);
        // None when the deadline is beyond what the clock can represent
        let deadline = tokio::time::Instant::now().checked_add(delay);
        debug!(delay_ms = delay.as_millis() as u64, "Expiry timer armed");

        self.pending = Some(tokio::spawn(async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
            debug!("Expiry timer fired");
            on_expire();
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
            debug!("Expiry timer cancelled");
        }
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> ExpiryCallback) {
        let fired = Arc::new(AtomicUsize::new(0));
        let make = {
            let fired = fired.clone();
            move || -> ExpiryCallback {
                let fired = fired.clone();
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (fired, make)
    }

    async fn advance(ms: i64) {
        tokio::time::advance(std::time::Duration::from_millis(ms as u64)).await;
        // Let the woken timer task run
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (fired, callback) = counter();
        let mut timer = ExpiryTimer::new();

        timer.schedule(Duration::milliseconds(1000), callback());
        assert!(timer.is_pending());

        advance(999).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(1).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (fired, callback) = counter();
        let mut timer = ExpiryTimer::new();

        timer.schedule(Duration::milliseconds(500), callback());
        timer.cancel();
        assert!(!timer.is_pending());

        advance(1000).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Cancelling with nothing pending is a no-op
        timer.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending() {
        let (fired, callback) = counter();
        let mut timer = ExpiryTimer::new();

        timer.schedule(Duration::milliseconds(100), callback());
        timer.schedule(Duration::milliseconds(1000), callback());

        advance(500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(500).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_delay_fires_immediately() {
        let (fired, callback) = counter();
        let mut timer = ExpiryTimer::new();

        timer.schedule(Duration::seconds(-30), callback());
        advance(0).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (fired, callback) = counter();
        let mut timer = ExpiryTimer::new();
        timer.schedule(Duration::milliseconds(10), callback());
        drop(timer);

        advance(100).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
