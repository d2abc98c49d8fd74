//! Lookup of running sessions by id.
//!
//! The registry holds weak references only: listing a session never keeps
//! it alive. Drivers add themselves on spawn and remove themselves when
//! they stop.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::WeakUnboundedSender;

use crate::session::{SessionCommand, SessionHandle, SessionId};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, WeakUnboundedSender<SessionCommand>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: SessionId, tx: WeakUnboundedSender<SessionCommand>) {
        self.sessions.lock().insert(id, tx);
    }

    pub(crate) fn remove(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
    }

    /// A handle to session `id`, if it is still running.
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        let tx = self.sessions.lock().get(&id)?.upgrade()?;
        Some(SessionHandle::new(id, tx))
    }

    /// Handles to every running session.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .iter()
            .filter_map(|(id, tx)| tx.upgrade().map(|tx| SessionHandle::new(*id, tx)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
