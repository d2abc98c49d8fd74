//! Echo mode: every frame goes back to its sender unchanged.

use bytes::BytesMut;
use tracing::trace;

use tern_core::{ServerHandler, Session};

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl ServerHandler for EchoHandler {
    fn on_message(&self, session: &mut Session, input: &[u8], output: &mut BytesMut) {
        trace!(session = %session.id(), len = input.len(), "echo");
        output.extend_from_slice(input);
    }
}
