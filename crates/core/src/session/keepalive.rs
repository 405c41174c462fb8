//! Heartbeat timer.

use std::{future::Future, time::Duration};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Periodic heartbeat while the session is connected.
///
/// At most one timer is alive: starting again replaces the running one and
/// stopping aborts it immediately.
#[derive(Debug, Default)]
pub struct KeepalivePulse {
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl KeepalivePulse {
    /// Stopped pulse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `beat` every `interval`, first after one full interval.
    pub fn start<F, Fut>(&self, interval: Duration, beat: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match beat().await {
                    Ok(()) => debug!("keepalive sent"),
                    Err(err) => warn!(%err, "keepalive failed"),
                }
            }
        });

        let previous = self.timer.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort the running timer, if any.
    pub fn stop(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// True while a timer is scheduled.
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for KeepalivePulse {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counting_beat(counter: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<Result<(), SessionError>> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_keeps_a_single_timer() {
        let pulse = KeepalivePulse::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        pulse.start(Duration::from_secs(15), counting_beat(&first));
        pulse.start(Duration::from_secs(15), counting_beat(&second));
        assert!(pulse.is_running());

        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(15)).await;
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_beats() {
        let pulse = KeepalivePulse::new();
        let count = Arc::new(AtomicUsize::new(0));
        pulse.start(Duration::from_secs(10), counting_beat(&count));

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        pulse.stop();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!pulse.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_beat_keeps_pulse_alive() {
        let pulse = KeepalivePulse::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        pulse.start(Duration::from_secs(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(SessionError::NotConnected))
        });

        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(pulse.is_running());
    }
}
