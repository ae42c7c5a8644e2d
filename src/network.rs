//! Network activity tracking and idle detection
//!
//! Consumes request/response/abort signals forwarded from the event bus,
//! maintains the outstanding-request count and declares "network idle"
//! once no requests have been in flight for a fixed quiet period.

use crate::barrier::BarrierHandle;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Quiet period with zero outstanding requests before idle is declared.
pub const QUIET_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub enum NetworkSignal {
    Send { id: String, url: String },
    Recv { id: String },
    Abort { id: String },
    /// Global run timeout: dump still-pending requests for diagnostics.
    Timeout,
}

pub struct NetworkActivityTracker {
    rx: mpsc::UnboundedReceiver<NetworkSignal>,
}

impl NetworkActivityTracker {
    pub fn channel() -> (mpsc::UnboundedSender<NetworkSignal>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Consume signals until the channel closes. Signals the barrier handle
    /// exactly once, when the quiet period elapses with no request in
    /// flight; the idle timer arms when the outstanding count drops to
    /// zero and is canceled by any new send.
    pub async fn run(mut self, handle: BarrierHandle) {
        let mut outstanding: usize = 0;
        let mut pending: HashMap<String, String> = HashMap::new();
        let mut idle_deadline: Option<Instant> = None;

        loop {
            let signal = match idle_deadline {
                Some(deadline) if !handle.is_done() => {
                    tokio::select! {
                        signal = self.rx.recv() => match signal {
                            Some(signal) => signal,
                            None => break,
                        },
                        _ = sleep_until(deadline) => {
                            info!("network idle");
                            handle.done();
                            idle_deadline = None;
                            continue;
                        }
                    }
                }
                _ => match self.rx.recv().await {
                    Some(signal) => signal,
                    None => break,
                },
            };

            match signal {
                NetworkSignal::Send { id, url } => {
                    idle_deadline = None;
                    outstanding += 1;
                    debug!(%id, %url, outstanding, "request sent");
                    pending.insert(id, url);
                }
                NetworkSignal::Recv { id } | NetworkSignal::Abort { id } => {
                    if pending.remove(&id).is_none() {
                        // tolerated, but indicates a tracking bug upstream
                        debug!(%id, "completion for untracked request");
                    }
                    let dropped_to_zero = outstanding == 1;
                    outstanding = outstanding.saturating_sub(1);
                    debug!(%id, outstanding, "request settled");
                    // only a real 1 -> 0 transition starts the quiet
                    // period; a ghost completion at zero must not
                    if dropped_to_zero {
                        idle_deadline = Some(Instant::now() + QUIET_PERIOD);
                    }
                }
                NetworkSignal::Timeout => {
                    for (id, url) in &pending {
                        warn!(%id, %url, "request still pending at timeout");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::AsyncBarrier;

    #[tokio::test(start_paused = true)]
    async fn idle_fires_one_second_after_last_response() {
        let barrier = AsyncBarrier::new();
        let (tx, tracker) = NetworkActivityTracker::channel();
        barrier.push(|handle| tracker.run(handle));

        tx.send(NetworkSignal::Send {
            id: "1".into(),
            url: "https://example.com/".into(),
        })
        .unwrap();
        tokio::time::advance(Duration::from_millis(2000)).await;
        tx.send(NetworkSignal::Recv { id: "1".into() }).unwrap();

        let before = tokio::time::Instant::now();
        barrier.wait().await;
        let waited = before.elapsed();
        assert!(waited >= QUIET_PERIOD, "idle fired early: {waited:?}");
        assert!(waited < QUIET_PERIOD + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn new_send_cancels_the_quiet_timer() {
        let barrier = AsyncBarrier::new();
        let (tx, tracker) = NetworkActivityTracker::channel();
        let handle = barrier.push(|handle| tracker.run(handle));

        tx.send(NetworkSignal::Send {
            id: "1".into(),
            url: "https://example.com/".into(),
        })
        .unwrap();
        tx.send(NetworkSignal::Recv { id: "1".into() }).unwrap();

        // halfway through the quiet window a new request appears
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(NetworkSignal::Send {
            id: "2".into(),
            url: "https://example.com/late.js".into(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!handle.is_done(), "idle must not fire while a request is in flight");

        tx.send(NetworkSignal::Recv { id: "2".into() }).unwrap();
        barrier.wait().await;
        assert!(handle.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn untracked_completion_does_not_underflow() {
        let barrier = AsyncBarrier::new();
        let (tx, tracker) = NetworkActivityTracker::channel();
        let handle = barrier.push(|handle| tracker.run(handle));

        tx.send(NetworkSignal::Recv { id: "ghost".into() }).unwrap();
        tx.send(NetworkSignal::Abort { id: "ghost2".into() }).unwrap();
        tx.send(NetworkSignal::Send {
            id: "1".into(),
            url: "https://example.com/".into(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!handle.is_done(), "send must keep the tracker busy");

        tx.send(NetworkSignal::Recv { id: "1".into() }).unwrap();
        barrier.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ghost_completion_at_zero_does_not_declare_idle() {
        let barrier = AsyncBarrier::new();
        let (tx, tracker) = NetworkActivityTracker::channel();
        let handle = barrier.push(|handle| tracker.run(handle));

        // a completion for a request that was never sent, while nothing
        // is outstanding
        tx.send(NetworkSignal::Recv { id: "ghost".into() }).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!handle.is_done(), "idle requires a real drop to zero");

        tx.send(NetworkSignal::Send {
            id: "1".into(),
            url: "https://example.com/".into(),
        })
        .unwrap();
        tx.send(NetworkSignal::Recv { id: "1".into() }).unwrap();
        barrier.wait().await;
        assert!(handle.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_signals_exactly_once() {
        let barrier = AsyncBarrier::new();
        let (tx, tracker) = NetworkActivityTracker::channel();
        let handle = barrier.push(|handle| tracker.run(handle));

        tx.send(NetworkSignal::Send {
            id: "1".into(),
            url: "https://example.com/".into(),
        })
        .unwrap();
        tx.send(NetworkSignal::Recv { id: "1".into() }).unwrap();
        barrier.wait().await;
        assert!(handle.is_done());

        // a second burst after idle must not re-signal or panic
        tx.send(NetworkSignal::Send {
            id: "2".into(),
            url: "https://example.com/ping".into(),
        })
        .unwrap();
        tx.send(NetworkSignal::Recv { id: "2".into() }).unwrap();
        tx.send(NetworkSignal::Timeout).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(barrier.pending(), 0);
    }
}
