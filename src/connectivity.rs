//! Shared online/offline signal.
//!
//! The runtime does not detect connectivity itself; whoever embeds it (the
//! CLI's `--offline` flag, the app shell, tests) flips the flag. Components
//! consult it before deciding to hit the network, and the worker subscribes
//! to replay its sync queue when the flag returns to online.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  /// Create a monitor with the given initial state.
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn set_online(&self, online: bool) {
    self.tx.send_replace(online);
  }

  /// Subscribe to state changes.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_flag_round_trip() {
    let monitor = ConnectivityMonitor::new(true);
    assert!(monitor.is_online());
    monitor.set_online(false);
    assert!(!monitor.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let monitor = ConnectivityMonitor::new(false);
    let mut rx = monitor.subscribe();

    monitor.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow());
  }
}
