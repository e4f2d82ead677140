//! Resettable stop signal.

use std::sync::Arc;

use tokio::sync::watch;

/// A settable, clearable flag that tasks can wait on.
///
/// This type is cheaply cloneable; clones observe the same flag.
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl Default for StopSignal {
   fn default() -> Self {
      Self::new()
   }
}

impl StopSignal {
   pub fn new() -> Self {
      Self(Arc::new(watch::Sender::new(false)))
   }

   pub fn set(&self) {
      self.0.send_replace(true);
   }

   pub fn clear(&self) {
      self.0.send_replace(false);
   }

   pub fn is_set(&self) -> bool {
      *self.0.borrow()
   }

   /// Resolves once the flag is set. Returns immediately if it already is.
   pub async fn wait(&self) {
      let mut rx = self.0.subscribe();
      // The sender lives in `self`, so the channel cannot close while waiting.
      let _ = rx.wait_for(|set| *set).await;
   }
}

#[cfg(test)]
mod tests {
   use std::time::Duration;

   use tokio::time;

   use super::*;

   #[tokio::test]
   async fn test_wait_returns_when_already_set() {
      let signal = StopSignal::new();
      signal.set();
      time::timeout(Duration::from_secs(1), signal.wait())
         .await
         .unwrap();
   }

   #[tokio::test]
   async fn test_wait_wakes_on_set_from_clone() {
      let signal = StopSignal::new();
      let waiter = tokio::spawn({
         let signal = signal.clone();
         async move { signal.wait().await }
      });
      time::sleep(Duration::from_millis(20)).await;
      assert!(!waiter.is_finished());
      signal.set();
      time::timeout(Duration::from_secs(1), waiter)
         .await
         .unwrap()
         .unwrap();
   }

   #[test]
   fn test_clear_resets() {
      let signal = StopSignal::new();
      signal.set();
      assert!(signal.is_set());
      signal.clear();
      assert!(!signal.is_set());
   }
}
