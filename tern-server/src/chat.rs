//! Multi-user chat room.
//!
//! A newcomer is asked for a name and answers `My name is <name>`. It is
//! then greeted with `Hello <name>` followed by the room history as one
//! envelope. Every later frame must be an envelope: it is recorded,
//! echoed to its sender and broadcast to every other member.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tern_core::envelope::{self, Envelopes, Message};
use tern_core::{ServerHandler, Session, SessionHandle, SessionId};

pub const NAME_REQUEST: &str = "What is your name?";
pub const NAME_PREFIX: &str = "My name is ";
pub const GREETING_PREFIX: &str = "Hello ";
pub const JOIN_NOTICE: &str = "Input to chat room!";
pub const LEAVE_NOTICE: &str = "is leaving";

struct Member {
    nickname: String,
    handle: SessionHandle,
}

#[derive(Default)]
struct RoomState {
    members: HashMap<SessionId, Member>,
    history: Vec<Message>,
}

/// Shared state of one room; install it as the server's handler.
pub struct ChatRoom {
    state: Mutex<RoomState>,
    history_limit: usize,
}

impl ChatRoom {
    /// A room that remembers the last `history_limit` messages (0 keeps
    /// all of them).
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(RoomState::default()),
            history_limit,
        }
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn nickname(&self, id: SessionId) -> Option<String> {
        self.state.lock().members.get(&id).map(|m| m.nickname.clone())
    }

    pub fn history(&self) -> Vec<Message> {
        self.state.lock().history.clone()
    }

    fn join(&self, session: &mut Session, name: &str, output: &mut BytesMut) {
        let notice = Message::new(JOIN_NOTICE, name);
        let Some(handle) = session.handle() else {
            return;
        };
        if let Err(e) = notice.validate() {
            debug!(session = %session.id(), error = %e, "rejected nickname");
            output.extend_from_slice(NAME_REQUEST.as_bytes());
            return;
        }
        let broadcast = match envelope::serialize(std::slice::from_ref(&notice)) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "join notice not encodable");
                return;
            }
        };

        let mut state = self.state.lock();
        if state.members.contains_key(&session.id()) {
            debug!(session = %session.id(), "already in the room");
            return;
        }
        self.record(&mut state, [notice]);

        output.extend_from_slice(GREETING_PREFIX.as_bytes());
        output.extend_from_slice(name.as_bytes());
        if let Err(e) = envelope::serialize_into(&state.history, output) {
            warn!(error = %e, "history not encodable");
        }

        broadcast_to(&state, session.id(), &broadcast);
        state.members.insert(
            session.id(),
            Member {
                nickname: name.to_string(),
                handle,
            },
        );
        info!(session = %session.id(), nickname = name, members = state.members.len(), "joined");
    }

    /// Remove a member and tell the others. Safe to call more than once.
    fn leave(&self, id: SessionId) {
        let mut state = self.state.lock();
        let Some(member) = state.members.remove(&id) else {
            return;
        };
        info!(session = %id, nickname = %member.nickname, members = state.members.len(), "left");

        let notice = Message::new(LEAVE_NOTICE, member.nickname);
        match envelope::serialize(std::slice::from_ref(&notice)) {
            Ok(bytes) => broadcast_to(&state, id, &Bytes::from(bytes)),
            Err(e) => warn!(error = %e, "leave notice not encodable"),
        }
        self.record(&mut state, [notice]);
    }

    fn record(&self, state: &mut RoomState, messages: impl IntoIterator<Item = Message>) {
        state.history.extend(messages);
        if self.history_limit > 0 && state.history.len() > self.history_limit {
            let excess = state.history.len() - self.history_limit;
            state.history.drain(..excess);
        }
    }
}

fn broadcast_to(state: &RoomState, sender: SessionId, data: &Bytes) {
    for (id, member) in &state.members {
        if *id == sender {
            continue;
        }
        if let Err(e) = member.handle.push(data.clone()) {
            debug!(session = %id, error = %e, "broadcast dropped");
        }
    }
}

impl ServerHandler for ChatRoom {
    fn on_accept(&self, _session: &mut Session, output: &mut BytesMut) {
        output.extend_from_slice(NAME_REQUEST.as_bytes());
    }

    fn on_message(&self, session: &mut Session, input: &[u8], output: &mut BytesMut) {
        if let Some(name) = input
            .strip_prefix(NAME_PREFIX.as_bytes())
            .and_then(|name| std::str::from_utf8(name).ok())
        {
            return self.join(session, name, output);
        }

        // Pushes queued on the peer while it was writing arrive as
        // back-to-back envelopes in one frame.
        let mut envelopes = Envelopes::new(input);
        let mut messages = Vec::new();
        for batch in envelopes.by_ref() {
            match batch {
                Ok(batch) => messages.extend(batch),
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "invalid chat message");
                    break;
                }
            }
        }
        let valid = &input[..envelopes.offset()];
        if valid.is_empty() {
            session.do_read();
            return;
        }

        let mut state = self.state.lock();
        self.record(&mut state, messages);
        output.extend_from_slice(valid);
        broadcast_to(&state, session.id(), &Bytes::copy_from_slice(valid));
    }

    fn on_close(&self, session: &mut Session, _reason: &[u8]) {
        self.leave(session.id());
    }

    fn on_end(&self, session: &mut Session) {
        self.leave(session.id());
    }
}

// ── Tests ────────────────────────────────────────────────────────
