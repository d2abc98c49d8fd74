//! Application hooks.
//!
//! Every method has a default, so a handler only implements what it
//! needs. Hooks run on the session's driver task, one at a time, and get
//! the session itself as their first argument: they may issue operations
//! (`do_read`, `do_close`, `launch_timer_with`...) or take a
//! [`SessionHandle`](super::SessionHandle) to reach it later.
//!
//! Bytes appended to `output` are written as soon as the hook returns.

use bytes::BytesMut;

use super::Session;

/// Hooks of a server (accepting) session.
pub trait ServerHandler: Send + Sync + 'static {
    /// The upgrade was accepted. Anything pushed to `output` is sent
    /// before the first read.
    fn on_accept(&self, session: &mut Session, output: &mut BytesMut) {
        let _ = (session, output);
    }

    /// A data frame arrived.
    fn on_message(&self, session: &mut Session, input: &[u8], output: &mut BytesMut) {
        let _ = (session, input, output);
    }

    /// The peer pinged. The transport answers with a pong on its own.
    fn on_ping(&self, session: &mut Session, payload: &[u8]) {
        let _ = (session, payload);
    }

    /// The peer answered a ping. Counts as liveness by default.
    fn on_pong(&self, session: &mut Session, payload: &[u8]) {
        let _ = payload;
        session.keepalive();
    }

    /// The peer sent a close frame.
    fn on_close(&self, session: &mut Session, reason: &[u8]) {
        let _ = (session, reason);
    }

    /// The driver stopped servicing the session, for whatever reason.
    fn on_end(&self, session: &mut Session) {
        let _ = session;
    }
}

/// Hooks of a client (connecting) session.
///
/// `next_read` starts out `true`; clearing it stops the session from
/// issuing the follow-up read, so the application decides when to listen
/// again (see [`Session::do_read`]).
pub trait ClientHandler: Send + Sync + 'static {
    /// TCP is up. By default starts the upgrade on the configured target.
    fn on_connect(&self, session: &mut Session) {
        let target = session.target().to_string();
        session.do_handshake(target);
    }

    /// The upgrade completed; the server's response is available through
    /// [`Session::upgrade_response`] for the duration of the call.
    ///
    /// Nothing is read unless `output` is filled and `next_read` is left
    /// set, or the hook calls `do_read` itself.
    fn on_handshake(&self, session: &mut Session, output: &mut BytesMut, next_read: &mut bool) {
        let _ = (session, output, next_read);
    }

    /// A data frame arrived.
    fn on_message(
        &self,
        session: &mut Session,
        input: &[u8],
        output: &mut BytesMut,
        next_read: &mut bool,
    ) {
        let _ = (session, input, output, next_read);
    }

    fn on_ping(&self, session: &mut Session, payload: &[u8]) {
        let _ = (session, payload);
    }

    /// Re-arms the idle window when the session has a watchdog.
    fn on_pong(&self, session: &mut Session, payload: &[u8]) {
        let _ = payload;
        session.keepalive();
    }

    fn on_close(&self, session: &mut Session, reason: &[u8]) {
        let _ = (session, reason);
    }

    fn on_end(&self, session: &mut Session) {
        let _ = session;
    }
}

/// Handler that relies entirely on the defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ServerHandler for NoopHandler {}
impl ClientHandler for NoopHandler {}
