use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

/// Single-assignment response channel. The first `fill` wins; later calls
/// are no-ops.
pub struct ResponseSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResponseSlot<T> {
    /// Create a slot and the receiver its value is delivered to.
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver a value. Returns true only for the call that delivered it.
    ///
    /// A receiver that has already gone away still consumes the slot.
    pub fn fill(&self, value: T) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
