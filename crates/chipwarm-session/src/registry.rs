//! In-memory map from chip id to its live transport session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::gateway::TransportSession;

/// A live session plus the epoch minted when it was opened.
///
/// The epoch distinguishes successive sessions of the same chip so a late
/// event from a superseded session cannot tear down its successor.
#[derive(Clone)]
pub struct SessionHandle {
    pub epoch: Uuid,
    pub session: Arc<dyn TransportSession>,
}

impl SessionHandle {
    pub fn new(session: Arc<dyn TransportSession>) -> Self {
        Self {
            epoch: Uuid::new_v4(),
            session,
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Process-local registry of live sessions. Pure mapping, no I/O.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the live handle for a chip, returning any handle it replaced.
    ///
    /// The caller closes a replaced handle; the registry only forgets it.
    pub fn register(&self, chip_id: Uuid, handle: SessionHandle) -> Option<SessionHandle> {
        self.map().insert(chip_id, handle)
    }

    pub fn lookup(&self, chip_id: Uuid) -> Option<SessionHandle> {
        self.map().get(&chip_id).cloned()
    }

    pub fn unregister(&self, chip_id: Uuid) -> Option<SessionHandle> {
        self.map().remove(&chip_id)
    }

    /// Remove the entry only if it still belongs to the given session epoch.
    pub fn unregister_if(&self, chip_id: Uuid, epoch: Uuid) -> Option<SessionHandle> {
        let mut map = self.map();
        match map.get(&chip_id) {
            Some(handle) if handle.epoch == epoch => map.remove(&chip_id),
            _ => None,
        }
    }

    pub fn contains(&self, chip_id: Uuid) -> bool {
        self.map().contains_key(&chip_id)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn chip_ids(&self) -> Vec<Uuid> {
        self.map().keys().copied().collect()
    }
}
