//! Counting asynchronous confirmations with a deadline.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Collects confirmations from any number of [`Confirmer`]s.
#[derive(Debug)]
pub struct AwaitGroup {
    tx: mpsc::UnboundedSender<()>,
    rx: mpsc::UnboundedReceiver<()>,
}

/// One party's handle for reporting back; dropping it unconfirmed is fine.
#[derive(Clone, Debug)]
pub struct Confirmer {
    tx: mpsc::UnboundedSender<()>,
}

impl Confirmer {
    pub fn confirm(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for AwaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl AwaitGroup {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn confirmer(&self) -> Confirmer {
        Confirmer {
            tx: self.tx.clone(),
        }
    }

    /// Wait until `count` confirmations have arrived or `timeout` elapses,
    /// whichever is first. Returns how many arrived; never fails.
    pub async fn await_nodes(&mut self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut arrived = 0;
        while arrived < count {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(())) => arrived += 1,
                Ok(None) | Err(_) => break,
            }
        }
        arrived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_once_count_reached() {
        let mut group = AwaitGroup::new();
        for _ in 0..3 {
            let confirmer = group.confirmer();
            tokio::spawn(async move { confirmer.confirm() });
        }
        assert_eq!(group.await_nodes(3, Duration::from_secs(5)).await, 3);
    }

    #[tokio::test]
    async fn test_timeout_reports_partial_count() {
        let mut group = AwaitGroup::new();
        group.confirmer().confirm();
        let _silent = group.confirmer();
        let arrived = group.await_nodes(2, Duration::from_millis(50)).await;
        assert_eq!(arrived, 1);
    }

    #[tokio::test]
    async fn test_zero_count_returns_immediately() {
        let mut group = AwaitGroup::new();
        assert_eq!(group.await_nodes(0, Duration::from_secs(60)).await, 0);
    }
}
