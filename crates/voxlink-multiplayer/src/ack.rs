//! Pending acknowledgements with deadlines.
//!
//! Each outstanding request (a ping, for instance) is keyed by a `u32`
//! nonce. The waiter gets a [`AckWaiter`] that resolves exactly once: with
//! the round-trip time when the acknowledgement arrives, with
//! [`AckOutcome::TimedOut`] once the deadline passes, or with
//! [`AckOutcome::Closed`] when the connection goes away.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

/// How an acknowledgement wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked { rtt: Duration },
    TimedOut,
    Closed,
}

/// Receiving side of one pending acknowledgement.
#[derive(Debug)]
pub struct AckWaiter {
    rx: oneshot::Receiver<AckOutcome>,
    deadline: Instant,
}

impl AckWaiter {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the outcome, timing out on its own at the deadline even if
    /// nobody calls [`AckTracker::expire`].
    pub async fn wait(self) -> AckOutcome {
        let deadline = tokio::time::Instant::from_std(self.deadline);
        match tokio::time::timeout_at(deadline, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => AckOutcome::Closed,
            Err(_) => AckOutcome::TimedOut,
        }
    }
}

struct Pending {
    sent_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<AckOutcome>,
}

/// Outstanding acknowledgements for one connection.
#[derive(Default)]
pub struct AckTracker {
    pending: FxHashMap<u32, Pending>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts waiting for `nonce`. A previous wait on the same nonce is
    /// closed.
    pub fn register(&mut self, nonce: u32, now: Instant, timeout: Duration) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let deadline = now + timeout;
        let previous = self.pending.insert(
            nonce,
            Pending {
                sent_at: now,
                deadline,
                tx,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.tx.send(AckOutcome::Closed);
        }
        AckWaiter { rx, deadline }
    }

    /// Resolves `nonce` as acknowledged. Returns the round-trip time, or
    /// `None` if nothing was waiting (late or unknown nonce).
    pub fn resolve(&mut self, nonce: u32, now: Instant) -> Option<Duration> {
        let pending = self.pending.remove(&nonce)?;
        if now > pending.deadline {
            let _ = pending.tx.send(AckOutcome::TimedOut);
            return None;
        }
        let rtt = now.saturating_duration_since(pending.sent_at);
        let _ = pending.tx.send(AckOutcome::Acked { rtt });
        Some(rtt)
    }

    /// Times out every wait whose deadline has passed. Returns their nonces.
    pub fn expire(&mut self, now: Instant) -> Vec<u32> {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(&nonce, _)| nonce)
            .collect();
        for nonce in &expired {
            if let Some(pending) = self.pending.remove(nonce) {
                let _ = pending.tx.send(AckOutcome::TimedOut);
            }
        }
        expired
    }

    /// Rejects every wait with [`AckOutcome::Closed`].
    pub fn close_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(AckOutcome::Closed);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for AckTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckTracker")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_reports_rtt() {
        let mut tracker = AckTracker::new();
        let start = Instant::now();
        let waiter = tracker.register(7, start, Duration::from_secs(5));
        let rtt = tracker.resolve(7, start + Duration::from_millis(40));
        assert_eq!(rtt, Some(Duration::from_millis(40)));
        assert_eq!(
            waiter.wait().await,
            AckOutcome::Acked {
                rtt: Duration::from_millis(40)
            }
        );
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_expire_times_out() {
        let mut tracker = AckTracker::new();
        let start = Instant::now();
        let waiter = tracker.register(1, start, Duration::from_secs(1));
        let _other = tracker.register(2, start, Duration::from_secs(10));
        assert!(tracker.expire(start + Duration::from_millis(500)).is_empty());
        assert_eq!(tracker.expire(start + Duration::from_secs(2)), vec![1]);
        assert_eq!(waiter.wait().await, AckOutcome::TimedOut);
        assert_eq!(tracker.len(), 1);
        // A late acknowledgement finds nothing.
        assert_eq!(tracker.resolve(1, start + Duration::from_secs(3)), None);
    }

    #[tokio::test]
    async fn test_close_all_rejects_waiters() {
        let mut tracker = AckTracker::new();
        let now = Instant::now();
        let a = tracker.register(1, now, Duration::from_secs(30));
        let b = tracker.register(2, now, Duration::from_secs(30));
        assert_eq!(tracker.close_all(), 2);
        assert_eq!(a.wait().await, AckOutcome::Closed);
        assert_eq!(b.wait().await, AckOutcome::Closed);
    }

    #[tokio::test]
    async fn test_waiter_times_out_on_its_own() {
        let mut tracker = AckTracker::new();
        let waiter = tracker.register(9, Instant::now(), Duration::from_millis(20));
        assert_eq!(waiter.wait().await, AckOutcome::TimedOut);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_tracker_closes() {
        let mut tracker = AckTracker::new();
        let waiter = tracker.register(3, Instant::now(), Duration::from_secs(30));
        drop(tracker);
        assert_eq!(waiter.wait().await, AckOutcome::Closed);
    }
}
