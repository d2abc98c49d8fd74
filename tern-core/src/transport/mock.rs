//! A [`Connection`] that only records what it was asked to do.
//!
//! Tests drive a session by hand: issue operations, inspect the recorded
//! [`Op`]s, then feed back whatever [`Completion`] the scenario needs.
//!
//! [`Completion`]: super::Completion

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{AcceptParams, CloseReason, Connection, FrameKind, HandshakeParams};

/// One operation issued on a [`RecordingConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Accept,
    Handshake { host: String, target: String },
    Read,
    Write(Bytes, FrameKind),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16),
    ForceClose,
}

/// Shared view of the operations recorded so far.
#[derive(Debug, Clone, Default)]
pub struct OpLog {
    ops: Arc<Mutex<Vec<Op>>>,
}

impl OpLog {
    /// Drain and return everything recorded since the last call.
    pub fn take(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.lock())
    }

    fn push(&self, op: Op) {
        self.ops.lock().push(op);
    }
}

#[derive(Debug, Default)]
pub struct RecordingConnection {
    log: OpLog,
}

impl RecordingConnection {
    pub fn new() -> (Self, OpLog) {
        let log = OpLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl Connection for RecordingConnection {
    fn accept(&mut self, _params: AcceptParams) {
        self.log.push(Op::Accept);
    }

    fn handshake(&mut self, params: HandshakeParams) {
        self.log.push(Op::Handshake {
            host: params.host,
            target: params.target,
        });
    }

    fn read(&mut self) {
        self.log.push(Op::Read);
    }

    fn write(&mut self, data: Bytes, kind: FrameKind) {
        self.log.push(Op::Write(data, kind));
    }

    fn ping(&mut self, payload: Bytes) {
        self.log.push(Op::Ping(payload));
    }

    fn pong(&mut self, payload: Bytes) {
        self.log.push(Op::Pong(payload));
    }

    fn close(&mut self, reason: CloseReason) {
        self.log.push(Op::Close(reason.code));
    }

    fn force_close(&mut self) {
        self.log.push(Op::ForceClose);
    }
}
