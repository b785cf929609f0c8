//! Single-fire bridge from callback-style APIs to an awaitable result.
//!
//! Platform collaborators (permission prompts, export completion, store
//! transactions) report through a [`Completion`] handle. The handle may be
//! cloned and invoked any number of times; only the first value is delivered.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::warn;

pub struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T> Completion<T> {
    /// Deliver `value`. Returns `false` if a value was already delivered or
    /// the awaiting side has gone away.
    pub fn complete(&self, value: T) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                warn!("Completion invoked more than once; ignoring duplicate");
                false
            }
        }
    }
}

/// Awaiting side of a [`Completion`].
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Wait for the first delivered value. `None` if every handle was
    /// dropped without completing.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

pub fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completion { slot: Arc::new(Mutex::new(Some(tx))) }, Pending { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_value_wins() {
        let (done, pending) = completion::<u32>();
        let twin = done.clone();

        assert!(done.complete(1));
        assert!(!twin.complete(2));
        assert!(!done.complete(3));
        assert_eq!(pending.wait().await, Some(1));
    }

    #[tokio::test]
    async fn test_dropped_without_value() {
        let (done, pending) = completion::<u32>();
        drop(done);
        assert_eq!(pending.wait().await, None);
    }

    #[tokio::test]
    async fn test_complete_from_other_thread() {
        let (done, pending) = completion::<&'static str>();
        std::thread::spawn(move || {
            done.complete("granted");
        });
        assert_eq!(pending.wait().await, Some("granted"));
    }
}
