//! Per-connection session state machine.
//!
//! One [`Session`] type serves both roles. A server session accepts an
//! upgrade and is watched by an idle [`Watchdog`]; a client session
//! performs the upgrade handshake and, unless asked otherwise, has no
//! watchdog.
//!
//! The session never blocks. Every `do_*` method issues at most one
//! operation on the [`Connection`] and returns; outcomes come back through
//! [`Session::on_completion`], which runs the matching hook and decides the
//! next step:
//!
//! ```text
//!  accept/handshake ─► on_accept / on_handshake ─┬─► write ─► read ─► on_message ─┐
//!                                                └─► read ◄──────────── write ◄───┘
//! ```
//!
//! At most one read and one write are outstanding at any time. Bytes
//! queued while a write is in flight go out as soon as it completes.
//!
//! The session is normally owned by a [`SessionDriver`], which feeds it
//! completions, timer wake-ups and [`SessionHandle`] commands one at a
//! time.

mod driver;
mod hooks;
mod phase;
pub mod watchdog;

pub use driver::{SessionCommand, SessionDriver, SessionHandle};
pub use hooks::{ClientHandler, NoopHandler, ServerHandler};
pub use phase::SessionPhase;
pub use watchdog::{TimerAction, TimerHandler, Watchdog};

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{ClientConfig, FrameMode, SessionConfig};
use crate::error::TransportError;
use crate::transport::{
    AcceptParams, CloseReason, Completion, Connection, ControlFrame, ControlKind, Frame,
    FrameKind, HandshakeParams, UpgradeResponse,
};

// ── SessionId ────────────────────────────────────────────────────

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Role ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Server,
    Client,
}

#[derive(Clone)]
enum Hooks {
    Server(Arc<dyn ServerHandler>),
    Client(Arc<dyn ClientHandler>),
}

enum Role {
    Server {
        handler: Arc<dyn ServerHandler>,
    },
    Client {
        handler: Arc<dyn ClientHandler>,
        host: String,
        target: String,
        request_headers: Vec<(String, String)>,
        /// Set only while `on_handshake` runs.
        response: Option<UpgradeResponse>,
    },
}

impl Role {
    fn hooks(&self) -> Hooks {
        match self {
            Role::Server { handler } => Hooks::Server(Arc::clone(handler)),
            Role::Client { handler, .. } => Hooks::Client(Arc::clone(handler)),
        }
    }

    fn kind(&self) -> RoleKind {
        match self {
            Role::Server { .. } => RoleKind::Server,
            Role::Client { .. } => RoleKind::Client,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session {
    id: SessionId,
    role: Role,
    phase: SessionPhase,
    conn: Box<dyn Connection>,
    config: SessionConfig,
    watchdog: Option<Watchdog>,

    /// No read outstanding.
    readable: bool,
    /// A write is outstanding.
    writing: bool,
    /// Whether the outstanding write is followed by a read.
    write_next_read: bool,
    /// Hook running; writes are deferred until it returns.
    in_hook: bool,
    forced: bool,
    ended: bool,

    frame_mode: FrameMode,
    outgoing: FrameKind,
    input: BytesMut,
    output: BytesMut,

    /// Operations issued and not yet completed.
    pending: usize,
    commands: Option<WeakUnboundedSender<SessionCommand>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role.kind())
            .field("phase", &self.phase)
            .field("readable", &self.readable)
            .field("writing", &self.writing)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A server session over a stream that still has to accept the upgrade.
    pub fn server(
        id: SessionId,
        conn: impl Connection + 'static,
        handler: Arc<dyn ServerHandler>,
        config: SessionConfig,
    ) -> Self {
        Self::build(
            id,
            Role::Server { handler },
            Box::new(conn),
            config,
            Some(Watchdog::new()),
        )
    }

    /// A client session over a freshly connected stream.
    pub fn client(
        id: SessionId,
        conn: impl Connection + 'static,
        handler: Arc<dyn ClientHandler>,
        config: &ClientConfig,
    ) -> Self {
        let role = Role::Client {
            handler,
            host: config.server_address.clone(),
            target: config.target.clone(),
            request_headers: config.request_headers.clone(),
            response: None,
        };
        let watchdog = config.keepalive.then(Watchdog::new);
        Self::build(id, role, Box::new(conn), config.session.clone(), watchdog)
    }

    fn build(
        id: SessionId,
        role: Role,
        conn: Box<dyn Connection>,
        config: SessionConfig,
        watchdog: Option<Watchdog>,
    ) -> Self {
        let outgoing = match config.frame_mode {
            FrameMode::Auto => FrameKind::Text,
            FrameMode::Fixed(kind) => kind,
        };
        Self {
            id,
            role,
            phase: SessionPhase::Created,
            conn,
            frame_mode: config.frame_mode,
            config,
            watchdog,
            readable: true,
            writing: false,
            write_next_read: true,
            in_hook: false,
            forced: false,
            ended: false,
            outgoing,
            input: BytesMut::new(),
            output: BytesMut::new(),
            pending: 0,
            commands: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// `accepted` for a server, `handshaked` for a client.
    pub fn is_established(&self) -> bool {
        self.phase.is_established()
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    /// No read is outstanding.
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn pending_ops(&self) -> usize {
        self.pending
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Request target used by a client's default `on_connect`.
    pub fn target(&self) -> &str {
        match &self.role {
            Role::Client { target, .. } => target,
            Role::Server { .. } => "",
        }
    }

    /// The server's upgrade response, while `on_handshake` runs.
    pub fn upgrade_response(&self) -> Option<&UpgradeResponse> {
        match &self.role {
            Role::Client { response, .. } => response.as_ref(),
            Role::Server { .. } => None,
        }
    }

    /// Bytes queued for the next write.
    pub fn output(&mut self) -> &mut BytesMut {
        &mut self.output
    }

    pub fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_ref()
    }

    /// When the pending watchdog wait expires, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.watchdog.as_ref().and_then(Watchdog::deadline)
    }

    /// A new handle to this session, if it is attached to a driver that
    /// is still running.
    pub fn handle(&self) -> Option<SessionHandle> {
        let tx = self.commands.as_ref()?.upgrade()?;
        Some(SessionHandle::new(self.id, tx))
    }

    // ── Frame type ───────────────────────────────────────────────

    pub fn frame_kind(&self) -> FrameKind {
        self.outgoing
    }

    /// Mirror the type of the last frame received.
    pub fn set_auto_frame(&mut self) {
        self.frame_mode = FrameMode::Auto;
    }

    pub fn set_text_frame(&mut self) {
        self.frame_mode = FrameMode::Fixed(FrameKind::Text);
        self.outgoing = FrameKind::Text;
    }

    pub fn set_binary_frame(&mut self) {
        self.frame_mode = FrameMode::Fixed(FrameKind::Binary);
        self.outgoing = FrameKind::Binary;
    }

    // ── Operations ───────────────────────────────────────────────

    /// Accept the upgrade on a server session.
    ///
    /// No-op on a client or once an upgrade has been issued. Arms the idle
    /// window and starts the default watchdog wait, so a peer that never
    /// completes the upgrade is dropped.
    pub fn do_accept(&mut self, params: AcceptParams) {
        if self.role.kind() != RoleKind::Server || self.phase.begin_establish().is_err() {
            return;
        }
        debug!(session = %self.id, "accepting upgrade");
        self.keepalive();
        self.pending += 1;
        self.conn.accept(params);
    }

    /// Run `on_connect`; the client's TCP stream is up.
    pub fn connected(&mut self) {
        if let Hooks::Client(handler) = self.role.hooks() {
            handler.on_connect(self);
        }
    }

    /// Perform the upgrade handshake on a client session.
    pub fn do_handshake(&mut self, target: impl Into<String>) {
        let Role::Client {
            host,
            request_headers,
            ..
        } = &self.role
        else {
            return;
        };
        let params = HandshakeParams {
            host: host.clone(),
            target: target.into(),
            request_headers: request_headers.clone(),
        };
        if self.phase.begin_establish().is_err() {
            return;
        }
        debug!(session = %self.id, target = %params.target, "starting handshake");
        self.keepalive();
        self.pending += 1;
        self.conn.handshake(params);
    }

    /// Issue a read. No-op until established or while a read is
    /// outstanding.
    pub fn do_read(&mut self) {
        if !self.readable || !self.phase.is_established() || self.phase == SessionPhase::Closing {
            return;
        }
        self.arm_idle();
        self.readable = false;
        self.pending += 1;
        self.conn.read();
    }

    /// Write the queued output.
    ///
    /// No-op until established, with nothing queued, or while a write is
    /// outstanding (the queue is flushed when that write completes).
    pub fn do_write(&mut self) {
        self.issue_write(true);
    }

    /// Queue `data` and write it as soon as possible.
    pub fn push(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
        self.do_write();
    }

    pub fn do_ping(&mut self, payload: Bytes) {
        if !self.can_send() {
            return;
        }
        self.arm_idle();
        self.pending += 1;
        self.conn.ping(payload);
    }

    pub fn do_pong(&mut self, payload: Bytes) {
        if !self.can_send() {
            return;
        }
        self.arm_idle();
        self.pending += 1;
        self.conn.pong(payload);
    }

    /// Start the closing handshake.
    pub fn do_close(&mut self, reason: CloseReason) {
        if !self.can_send() || self.phase.begin_close().is_err() {
            return;
        }
        debug!(
            session = %self.id,
            code = reason.code,
            uptime = ?self.phase.established_for(),
            "closing"
        );
        self.arm_idle();
        self.pending += 1;
        self.conn.close(reason);
    }

    /// Drop the connection now. Outstanding operations complete as
    /// aborted.
    pub fn force_close(&mut self) {
        if !self.forced {
            self.forced = true;
            self.conn.force_close();
        }
        self.terminate();
    }

    fn can_send(&self) -> bool {
        matches!(self.phase, SessionPhase::Established { .. })
    }

    fn issue_write(&mut self, next_read: bool) {
        if self.in_hook || self.writing || self.output.is_empty() || !self.can_send() {
            return;
        }
        let data = self.output.split().freeze();
        trace!(session = %self.id, len = data.len(), "write");
        self.writing = true;
        self.write_next_read = next_read;
        self.pending += 1;
        self.conn.write(data, self.outgoing);
    }

    // ── Watchdog ─────────────────────────────────────────────────

    /// Start the default watchdog wait (probe, then force close).
    pub fn launch_timer(&mut self) {
        self.watchdog
            .get_or_insert_with(Watchdog::new)
            .launch(TimerAction::Default);
    }

    /// Start a watchdog wait that runs `handler` once instead of the
    /// default escalation.
    pub fn launch_timer_with<F>(&mut self, handler: F)
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        self.watchdog
            .get_or_insert_with(Watchdog::new)
            .launch(TimerAction::Custom(Box::new(handler)));
    }

    /// Move the watchdog deadline to `now + window`.
    pub fn arm_timer(&mut self, window: Duration) {
        self.watchdog.get_or_insert_with(Watchdog::new).arm(window);
    }

    /// Liveness signal: re-arm the idle window and restart the default
    /// wait. No-op without a watchdog.
    pub fn keepalive(&mut self) {
        if self.phase.is_closed() {
            return;
        }
        let idle = self.config.idle_timeout;
        if let Some(dog) = self.watchdog.as_mut() {
            dog.arm(idle);
            dog.launch(TimerAction::Default);
        }
    }

    fn arm_idle(&mut self) {
        let idle = self.config.idle_timeout;
        if let Some(dog) = self.watchdog.as_mut() {
            dog.arm(idle);
        }
    }

    /// The peer sent data. An unanswered ping no longer matters, so the
    /// next silence starts the escalation over.
    fn peer_active(&mut self) {
        let idle = self.config.idle_timeout;
        if let Some(dog) = self.watchdog.as_mut() {
            dog.arm(idle);
            if dog.is_escalated() {
                dog.launch(TimerAction::Default);
            }
        }
    }

    /// Run the watchdog if its deadline has passed at `now`.
    pub fn fire_timer(&mut self, now: Instant) {
        let Some(action) = self.watchdog.as_mut().and_then(|dog| dog.poll(now)) else {
            return;
        };
        match action {
            TimerAction::Custom(handler) => handler(self),
            TimerAction::ForceClose => {
                debug!(session = %self.id, "no answer to keepalive probe, forcing close");
                self.force_close();
            }
            TimerAction::Default if !self.can_send() => {
                debug!(session = %self.id, phase = %self.phase, "watchdog expired, forcing close");
                self.force_close();
            }
            TimerAction::Default => {
                debug!(session = %self.id, "idle window expired, probing peer");
                self.do_ping(Bytes::new());
                let probe = self.config.probe_timeout;
                if let Some(dog) = self.watchdog.as_mut() {
                    dog.arm(probe);
                    dog.launch(TimerAction::ForceClose);
                }
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Apply a command posted through a [`SessionHandle`].
    pub fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Push(data) => self.push(&data),
            SessionCommand::Read => self.do_read(),
            SessionCommand::Ping(payload) => self.do_ping(payload),
            SessionCommand::Close(reason) => self.do_close(reason),
            SessionCommand::Run(f) => f(self),
        }
    }

    // ── Completions ──────────────────────────────────────────────

    /// Feed the outcome of an operation, or an inbound control frame.
    pub fn on_completion(&mut self, completion: Completion) {
        if !matches!(completion, Completion::Control(_)) {
            self.pending = self.pending.saturating_sub(1);
        }
        match completion {
            Completion::Accepted(result) => self.on_accepted(result),
            Completion::Handshaked(result) => self.on_handshaked(result),
            Completion::Read(result) => self.on_read(result),
            Completion::Written(result) => self.on_written(result),
            Completion::Pinged(result) => self.on_control_sent("ping", result),
            Completion::Ponged(result) => self.on_control_sent("pong", result),
            Completion::Closed(result) => self.on_close_sent(result),
            Completion::Control(frame) => self.on_control(frame),
        }
    }

    /// The completion stream ended without a force close.
    pub fn transport_lost(&mut self) {
        self.pending = 0;
        self.terminate();
    }

    fn on_accepted(&mut self, result: Result<(), TransportError>) {
        if let Err(e) = result {
            return self.fail("accept", e);
        }
        if self.phase.complete_establish().is_err() {
            return;
        }
        debug!(session = %self.id, "upgrade accepted");

        let mut output = self.lend_output();
        if let Hooks::Server(handler) = self.role.hooks() {
            handler.on_accept(self, &mut output);
        }
        self.restore_output(output);
        self.advance(true);
    }

    fn on_handshaked(&mut self, result: Result<UpgradeResponse, TransportError>) {
        let response = match result {
            Ok(response) => response,
            Err(e) => return self.fail("handshake", e),
        };
        if self.phase.complete_establish().is_err() {
            return;
        }
        debug!(session = %self.id, status = %response.status(), "handshake complete");
        self.keepalive();

        if let Role::Client { response: slot, .. } = &mut self.role {
            *slot = Some(response);
        }
        let mut next_read = true;
        let mut output = self.lend_output();
        if let Hooks::Client(handler) = self.role.hooks() {
            handler.on_handshake(self, &mut output, &mut next_read);
        }
        self.restore_output(output);
        if let Role::Client { response: slot, .. } = &mut self.role {
            *slot = None;
        }

        // No implicit read after a handshake: only a write carries one.
        if !self.phase.is_closed() && !self.output.is_empty() {
            self.issue_write(next_read);
        }
    }

    fn on_read(&mut self, result: Result<Frame, TransportError>) {
        self.readable = true;
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => return self.fail("read", e),
        };
        if self.phase.is_closed() {
            return;
        }
        trace!(session = %self.id, len = frame.data.len(), kind = ?frame.kind, "read");
        self.peer_active();

        let mut input = mem::take(&mut self.input);
        input.extend_from_slice(&frame.data);
        let mut output = self.lend_output();
        let mut next_read = true;
        match self.role.hooks() {
            Hooks::Server(handler) => handler.on_message(self, &input, &mut output),
            Hooks::Client(handler) => {
                handler.on_message(self, &input, &mut output, &mut next_read)
            }
        }
        self.restore_output(output);
        input.clear();
        self.input = input;

        if self.frame_mode == FrameMode::Auto {
            self.outgoing = frame.kind;
        }
        self.advance(next_read);
    }

    fn on_written(&mut self, result: Result<usize, TransportError>) {
        self.writing = false;
        let next_read = mem::replace(&mut self.write_next_read, true);
        if let Err(e) = result {
            return self.fail("write", e);
        }
        if self.phase.is_closed() {
            return;
        }
        self.advance(next_read);
    }

    fn on_control_sent(&mut self, op: &'static str, result: Result<(), TransportError>) {
        if let Err(e) = result {
            return self.fail(op, e);
        }
        self.do_read();
    }

    fn on_close_sent(&mut self, result: Result<(), TransportError>) {
        if let Err(e) = result {
            return self.fail("close", e);
        }
        debug!(session = %self.id, "close sent");
        self.terminate();

        // Give the peer one probe window to answer before dropping it.
        if !self.readable {
            let probe = self.config.probe_timeout;
            let dog = self.watchdog.get_or_insert_with(Watchdog::new);
            dog.arm(probe);
            dog.launch(TimerAction::ForceClose);
        }
    }

    fn on_control(&mut self, frame: ControlFrame) {
        if self.phase.is_closed() {
            return;
        }
        trace!(session = %self.id, kind = ?frame.kind, "control frame");
        let hooks = self.role.hooks();
        match (frame.kind, hooks) {
            (ControlKind::Ping, Hooks::Server(h)) => h.on_ping(self, &frame.payload),
            (ControlKind::Pong, Hooks::Server(h)) => h.on_pong(self, &frame.payload),
            (ControlKind::Close, Hooks::Server(h)) => h.on_close(self, &frame.payload),
            (ControlKind::Ping, Hooks::Client(h)) => h.on_ping(self, &frame.payload),
            (ControlKind::Pong, Hooks::Client(h)) => h.on_pong(self, &frame.payload),
            (ControlKind::Close, Hooks::Client(h)) => h.on_close(self, &frame.payload),
        }
        // Anything a hook queued.
        self.do_write();
    }

    /// Write if something is queued, otherwise keep reading.
    fn advance(&mut self, next_read: bool) {
        if self.phase.is_closed() {
            return;
        }
        if !self.output.is_empty() {
            self.issue_write(next_read);
        } else if next_read {
            self.do_read();
        }
    }

    fn lend_output(&mut self) -> BytesMut {
        self.in_hook = true;
        mem::take(&mut self.output)
    }

    /// Put the hook's output back, followed by anything pushed through
    /// the session while the hook ran.
    fn restore_output(&mut self, output: BytesMut) {
        self.in_hook = false;
        let queued = mem::replace(&mut self.output, output);
        self.output.extend_from_slice(&queued);
    }

    // ── Termination ──────────────────────────────────────────────

    fn fail(&mut self, op: &'static str, err: TransportError) {
        if !self.phase.is_closed() {
            if err.is_silent() {
                debug!(session = %self.id, op, error = %err, "session stopped");
            } else {
                warn!(session = %self.id, op, error = %err, "session failed");
            }
        }
        if err == TransportError::Aborted {
            self.terminate();
        } else {
            self.force_close();
        }
    }

    fn terminate(&mut self) {
        self.phase.terminate();
        self.output.clear();
        if let Some(dog) = self.watchdog.as_mut() {
            dog.cancel();
        }
    }

    /// Run `on_end` once. Called by the driver when it stops.
    pub fn end(&mut self) {
        if mem::replace(&mut self.ended, true) {
            return;
        }
        match self.role.hooks() {
            Hooks::Server(handler) => handler.on_end(self),
            Hooks::Client(handler) => handler.on_end(self),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Op, OpLog, RecordingConnection};
    use parking_lot::Mutex;
    use tokio_tungstenite::tungstenite::http::StatusCode;

    fn text(data: &'static [u8]) -> Completion {
        Completion::Read(Ok(Frame {
            kind: FrameKind::Text,
            data: Bytes::from_static(data),
        }))
    }

    fn write(data: &'static [u8]) -> Op {
        Op::Write(Bytes::from_static(data), FrameKind::Text)
    }

    fn switching_protocols() -> UpgradeResponse {
        let mut response = UpgradeResponse::new(None);
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        response
    }

    // ── Server fixtures ──────────────────────────────────────────

    #[derive(Default)]
    struct Echo {
        greeting: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl ServerHandler for Echo {
        fn on_accept(&self, _session: &mut Session, output: &mut BytesMut) {
            if let Some(greeting) = self.greeting {
                output.extend_from_slice(greeting.as_bytes());
            }
        }

        fn on_message(&self, _session: &mut Session, input: &[u8], output: &mut BytesMut) {
            self.seen.lock().push(String::from_utf8_lossy(input).into_owned());
            output.extend_from_slice(input);
        }

        fn on_close(&self, session: &mut Session, _reason: &[u8]) {
            session.push(b"bye");
        }
    }

    fn server_with(handler: Echo) -> (Session, OpLog, Arc<Echo>) {
        let (conn, log) = RecordingConnection::new();
        let handler = Arc::new(handler);
        let session = Session::server(
            SessionId::next(),
            conn,
            handler.clone(),
            SessionConfig::default(),
        );
        (session, log, handler)
    }

    fn accepted_server() -> (Session, OpLog, Arc<Echo>) {
        let (mut session, log, handler) = server_with(Echo::default());
        session.do_accept(AcceptParams::new());
        session.on_completion(Completion::Accepted(Ok(())));
        assert_eq!(log.take(), vec![Op::Accept, Op::Read]);
        (session, log, handler)
    }

    #[test]
    fn operations_are_gated_until_accepted() {
        let (mut session, log, _) = server_with(Echo::default());
        session.do_read();
        session.push(b"early");
        session.do_ping(Bytes::new());
        session.do_pong(Bytes::new());
        session.do_close(CloseReason::normal());
        assert!(log.take().is_empty());
        assert_eq!(session.pending_ops(), 0);

        session.do_accept(AcceptParams::new());
        session.do_accept(AcceptParams::new());
        assert_eq!(log.take(), vec![Op::Accept]);

        // Still gated while the accept is in flight.
        session.do_read();
        assert!(log.take().is_empty());
    }

    #[test]
    fn accept_pushes_greeting_before_first_read() {
        let (mut session, log, _) = server_with(Echo {
            greeting: Some("What is your name?"),
            ..Echo::default()
        });
        session.push(b"queued before accept ");
        session.do_accept(AcceptParams::new());
        session.on_completion(Completion::Accepted(Ok(())));
        assert!(session.is_established());
        assert_eq!(
            log.take(),
            vec![Op::Accept, write(b"queued before accept What is your name?")]
        );

        session.on_completion(Completion::Written(Ok(39)));
        assert_eq!(log.take(), vec![Op::Read]);
    }

    #[test]
    fn echo_turn_taking() {
        let (mut session, log, handler) = accepted_server();

        session.on_completion(text(b"hi"));
        assert_eq!(log.take(), vec![write(b"hi")]);
        assert!(session.is_readable());
        assert!(session.is_writing());

        session.on_completion(Completion::Written(Ok(2)));
        assert_eq!(log.take(), vec![Op::Read]);

        session.on_completion(text(b"again"));
        session.on_completion(Completion::Written(Ok(5)));
        assert_eq!(log.take(), vec![write(b"again"), Op::Read]);
        assert_eq!(*handler.seen.lock(), vec!["hi", "again"]);
        assert_eq!(session.pending_ops(), 1);
    }

    #[test]
    fn at_most_one_read_outstanding() {
        let (mut session, log, _) = accepted_server();
        session.do_read();
        session.do_read();
        assert!(log.take().is_empty());
        assert!(!session.is_readable());
    }

    #[test]
    fn push_during_write_is_flushed_before_next_read() {
        let (mut session, log, _) = accepted_server();
        session.on_completion(text(b"one"));
        session.push(b"two");
        session.push(b"three");
        assert_eq!(log.take(), vec![write(b"one")]);

        session.on_completion(Completion::Written(Ok(3)));
        assert_eq!(log.take(), vec![write(b"twothree")]);

        session.on_completion(Completion::Written(Ok(8)));
        assert_eq!(log.take(), vec![Op::Read]);
    }

    #[test]
    fn auto_frame_mirrors_last_read() {
        let (mut session, log, _) = accepted_server();
        session.on_completion(Completion::Read(Ok(Frame {
            kind: FrameKind::Binary,
            data: Bytes::from_static(&[1, 2, 3]),
        })));
        assert_eq!(
            log.take(),
            vec![Op::Write(Bytes::from_static(&[1, 2, 3]), FrameKind::Binary)]
        );

        session.on_completion(Completion::Written(Ok(3)));
        session.set_text_frame();
        session.on_completion(Completion::Read(Ok(Frame {
            kind: FrameKind::Binary,
            data: Bytes::from_static(b"x"),
        })));
        assert_eq!(log.take(), vec![Op::Read, write(b"x")]);
    }

    #[test]
    fn transport_failure_is_terminal() {
        let (mut session, log, _) = accepted_server();
        session.on_completion(Completion::Read(Err(TransportError::Failure("reset".into()))));
        assert!(session.is_closed());
        assert_eq!(log.take(), vec![Op::ForceClose]);

        session.do_read();
        session.push(b"late");
        assert!(log.take().is_empty());
    }

    #[test]
    fn aborted_and_closed_stop_silently() {
        let (mut session, log, _) = accepted_server();
        session.on_completion(Completion::Read(Err(TransportError::Aborted)));
        assert!(session.is_closed());
        assert!(log.take().is_empty());

        let (mut session, log, _) = accepted_server();
        session.on_completion(Completion::Read(Err(TransportError::Closed)));
        assert!(session.is_closed());
        assert_eq!(log.take(), vec![Op::ForceClose]);
    }

    #[test]
    fn control_frames_do_not_disturb_the_cycle() {
        let (mut session, log, _) = accepted_server();
        session.on_completion(Completion::Control(ControlFrame {
            kind: ControlKind::Ping,
            payload: Bytes::new(),
        }));
        assert!(log.take().is_empty());
        assert!(!session.is_readable());

        // The close hook pushes a farewell; the outstanding read is kept.
        session.on_completion(Completion::Control(ControlFrame {
            kind: ControlKind::Close,
            payload: Bytes::new(),
        }));
        assert_eq!(log.take(), vec![write(b"bye")]);
        assert_eq!(session.pending_ops(), 2);
    }

    #[test]
    fn ping_completion_reads_only_when_idle() {
        let (mut session, log, _) = accepted_server();
        session.do_ping(Bytes::from_static(b"p"));
        session.on_completion(Completion::Pinged(Ok(())));
        assert_eq!(log.take(), vec![Op::Ping(Bytes::from_static(b"p"))]);

        session.on_completion(text(b"x"));
        session.on_completion(Completion::Written(Ok(1)));
        log.take();
        session.on_completion(Completion::Read(Ok(Frame {
            kind: FrameKind::Text,
            data: Bytes::new(),
        })));
        // Empty echo: nothing to write, so read again.
        assert_eq!(log.take(), vec![Op::Read]);
    }

    #[test]
    fn close_then_closed() {
        let (mut session, log, _) = accepted_server();
        session.do_close(CloseReason::normal());
        session.do_close(CloseReason::normal());
        assert_eq!(session.phase(), &SessionPhase::Closing);
        assert_eq!(log.take(), vec![Op::Close(1000)]);

        // Reads are not reissued while closing.
        session.on_completion(Completion::Closed(Ok(())));
        assert!(session.is_closed());
        // The outstanding read gets one probe window.
        assert!(session.next_deadline().is_some());
    }

    // ── Watchdog ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn watchdog_probes_then_force_closes() {
        let (mut session, log, _) = accepted_server();
        let deadline = session.next_deadline().unwrap();
        assert_eq!(deadline, Instant::now() + Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::Ping(Bytes::new())]);
        assert!(!session.is_closed());

        session.on_completion(Completion::Pinged(Ok(())));
        assert!(log.take().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::ForceClose]);
        assert!(session.is_closed());
        assert_eq!(session.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_prevents_escalation() {
        let (mut session, log, _) = accepted_server();

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        session.on_completion(Completion::Pinged(Ok(())));
        log.take();

        tokio::time::advance(Duration::from_secs(4)).await;
        session.on_completion(Completion::Control(ControlFrame {
            kind: ControlKind::Pong,
            payload: Bytes::new(),
        }));

        // Probe window would have ended here.
        tokio::time::advance(Duration::from_secs(6)).await;
        session.fire_timer(Instant::now());
        assert!(log.take().is_empty());

        // A full idle window after the pong, probe again.
        tokio::time::advance(Duration::from_secs(4)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::Ping(Bytes::new())]);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_makes_old_deadline_stale() {
        let (mut session, log, _) = accepted_server();
        let first = session.next_deadline().unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        session.on_completion(text(b"x"));
        session.on_completion(Completion::Written(Ok(1)));
        log.take();

        tokio::time::advance(Duration::from_secs(4)).await;
        session.fire_timer(first);
        assert!(log.take().is_empty());
        assert!(session.next_deadline().unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn unfinished_upgrade_is_force_closed() {
        let (mut session, log, _) = server_with(Echo::default());
        session.do_accept(AcceptParams::new());
        log.take();

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::ForceClose]);

        session.on_completion(Completion::Accepted(Err(TransportError::Aborted)));
        assert!(log.take().is_empty());
        assert_eq!(session.pending_ops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn data_during_ping_window_restarts_escalation() {
        let (mut session, log, _) = accepted_server();

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        session.on_completion(Completion::Pinged(Ok(())));
        assert_eq!(log.take(), vec![Op::Ping(Bytes::new())]);

        tokio::time::advance(Duration::from_secs(2)).await;
        session.on_completion(text(b"alive"));
        session.on_completion(Completion::Written(Ok(5)));
        assert_eq!(log.take(), vec![write(b"alive"), Op::Read]);
        assert!(!session.watchdog().unwrap().is_escalated());

        // A full idle window after the data: ping again, no force close.
        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::Ping(Bytes::new())]);
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn data_keeps_a_custom_wait() {
        let (mut session, log, _) = accepted_server();
        session.launch_timer_with(|s| s.push(b"tick"));

        tokio::time::advance(Duration::from_secs(5)).await;
        session.on_completion(text(b"x"));
        session.on_completion(Completion::Written(Ok(1)));
        log.take();

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![write(b"tick")]);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_timer_handler_runs_once() {
        let (mut session, log, _) = accepted_server();
        session.launch_timer_with(|s| s.push(b"tick"));

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![write(b"tick")]);
        assert_eq!(session.next_deadline(), None);

        tokio::time::advance(Duration::from_secs(30)).await;
        session.fire_timer(Instant::now());
        assert!(log.take().is_empty());
    }

    // ── Client ───────────────────────────────────────────────────

    #[derive(Default)]
    struct Pacer {
        greeting: Option<&'static str>,
        keep_reading: bool,
        saw_response: Mutex<Option<StatusCode>>,
        seen: Mutex<Vec<String>>,
    }

    impl ClientHandler for Pacer {
        fn on_handshake(&self, session: &mut Session, output: &mut BytesMut, next_read: &mut bool) {
            *self.saw_response.lock() = session.upgrade_response().map(|r| r.status());
            if let Some(greeting) = self.greeting {
                output.extend_from_slice(greeting.as_bytes());
            }
            *next_read = self.keep_reading;
        }

        fn on_message(
            &self,
            _session: &mut Session,
            input: &[u8],
            _output: &mut BytesMut,
            next_read: &mut bool,
        ) {
            self.seen.lock().push(String::from_utf8_lossy(input).into_owned());
            *next_read = self.keep_reading;
        }
    }

    fn client_with(handler: Pacer, config: ClientConfig) -> (Session, OpLog, Arc<Pacer>) {
        let (conn, log) = RecordingConnection::new();
        let handler = Arc::new(handler);
        let mut session = Session::client(SessionId::next(), conn, handler.clone(), &config);
        let target = session.target().to_string();
        session.do_handshake(target);
        (session, log, handler)
    }

    #[test]
    fn client_handshake_uses_configured_host() {
        let config = ClientConfig::new("example.test:80").target("/chat");
        let (mut session, log, _) = client_with(Pacer::default(), config);
        assert_eq!(
            log.take(),
            vec![Op::Handshake {
                host: "example.test:80".into(),
                target: "/chat".into()
            }]
        );
        session.do_handshake("/again");
        assert!(log.take().is_empty());
        assert_eq!(session.role(), RoleKind::Client);
    }

    #[test]
    fn client_handshake_without_output_does_not_read() {
        let (mut session, log, handler) =
            client_with(Pacer::default(), ClientConfig::default());
        log.take();
        session.on_completion(Completion::Handshaked(Ok(switching_protocols())));
        assert!(session.is_established());
        assert!(log.take().is_empty());
        assert_eq!(*handler.saw_response.lock(), Some(StatusCode::SWITCHING_PROTOCOLS));
        assert!(session.upgrade_response().is_none());
    }

    #[test]
    fn client_next_read_controls_follow_up() {
        let pacer = Pacer {
            greeting: Some("hello"),
            keep_reading: true,
            ..Pacer::default()
        };
        let (mut session, log, _) = client_with(pacer, ClientConfig::default());
        log.take();
        session.on_completion(Completion::Handshaked(Ok(switching_protocols())));
        session.on_completion(Completion::Written(Ok(5)));
        assert_eq!(log.take(), vec![write(b"hello"), Op::Read]);

        session.on_completion(text(b"world"));
        assert_eq!(log.take(), vec![Op::Read]);
    }

    #[test]
    fn client_can_pause_reading() {
        let pacer = Pacer {
            greeting: Some("hello"),
            keep_reading: false,
            ..Pacer::default()
        };
        let (mut session, log, handler) = client_with(pacer, ClientConfig::default());
        log.take();
        session.on_completion(Completion::Handshaked(Ok(switching_protocols())));
        session.on_completion(Completion::Written(Ok(5)));
        assert_eq!(log.take(), vec![write(b"hello")]);

        // The application decides when to listen again.
        session.do_read();
        session.on_completion(text(b"reply"));
        assert_eq!(log.take(), vec![Op::Read]);
        assert_eq!(*handler.seen.lock(), vec!["reply"]);
        assert!(session.is_readable());
    }

    #[tokio::test(start_paused = true)]
    async fn client_has_no_watchdog_by_default() {
        let (mut session, log, _) = client_with(
            Pacer {
                keep_reading: true,
                ..Pacer::default()
            },
            ClientConfig::default(),
        );
        session.on_completion(Completion::Handshaked(Ok(switching_protocols())));
        session.do_read();
        log.take();

        assert!(session.watchdog().is_none());
        assert_eq!(session.next_deadline(), None);
        tokio::time::advance(Duration::from_secs(60)).await;
        session.fire_timer(Instant::now());
        assert!(log.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn client_keepalive_is_opt_in() {
        let (mut session, log, _) = client_with(
            Pacer {
                keep_reading: true,
                ..Pacer::default()
            },
            ClientConfig::default().keepalive(true),
        );
        session.on_completion(Completion::Handshaked(Ok(switching_protocols())));
        session.do_read();
        log.take();

        tokio::time::advance(Duration::from_secs(10)).await;
        session.fire_timer(Instant::now());
        assert_eq!(log.take(), vec![Op::Ping(Bytes::new())]);
    }

    // ── Interleavings ────────────────────────────────────────────

    mod interleavings {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Read(Vec<u8>),
            Written,
            Pinged,
            Ponged,
            PeerPing,
            PeerPong,
            Push(Vec<u8>),
            DoRead,
            DoPing,
            DoPong,
        }

        fn step() -> impl Strategy<Value = Step> {
            let payload = || proptest::collection::vec(any::<u8>(), 0..6);
            prop_oneof![
                payload().prop_map(Step::Read),
                Just(Step::Written),
                Just(Step::Pinged),
                Just(Step::Ponged),
                Just(Step::PeerPing),
                Just(Step::PeerPong),
                payload().prop_map(Step::Push),
                Just(Step::DoRead),
                Just(Step::DoPing),
                Just(Step::DoPong),
            ]
        }

        /// Operations issued on the connection and not yet completed.
        #[derive(Debug, Default)]
        struct InFlight {
            reads: usize,
            writes: usize,
            pings: usize,
            pongs: usize,
        }

        impl InFlight {
            fn record(&mut self, ops: Vec<Op>) -> Result<(), TestCaseError> {
                for op in ops {
                    match op {
                        Op::Read => self.reads += 1,
                        Op::Write(data, _) => {
                            prop_assert!(!data.is_empty(), "empty write issued");
                            self.writes += 1;
                        }
                        Op::Ping(_) => self.pings += 1,
                        Op::Pong(_) => self.pongs += 1,
                        other => prop_assert!(false, "unexpected op {:?}", other),
                    }
                }
                Ok(())
            }

            /// Take one outstanding operation of a kind, if any.
            fn complete(count: &mut usize) -> bool {
                if *count == 0 {
                    return false;
                }
                *count -= 1;
                true
            }

            fn total(&self) -> usize {
                self.reads + self.writes + self.pings + self.pongs
            }
        }

        fn control(kind: ControlKind) -> Completion {
            Completion::Control(ControlFrame {
                kind,
                payload: Bytes::new(),
            })
        }

        proptest! {
            #[test]
            fn one_read_and_one_write_at_most(
                steps in proptest::collection::vec(step(), 1..64)
            ) {
                let (mut session, log, _) = accepted_server();
                let mut in_flight = InFlight { reads: 1, ..InFlight::default() };

                for step in steps {
                    match step {
                        Step::Read(data) => {
                            if InFlight::complete(&mut in_flight.reads) {
                                session.on_completion(Completion::Read(Ok(Frame {
                                    kind: FrameKind::Text,
                                    data: Bytes::from(data),
                                })));
                            }
                        }
                        Step::Written => {
                            if InFlight::complete(&mut in_flight.writes) {
                                session.on_completion(Completion::Written(Ok(1)));
                            }
                        }
                        Step::Pinged => {
                            if InFlight::complete(&mut in_flight.pings) {
                                session.on_completion(Completion::Pinged(Ok(())));
                            }
                        }
                        Step::Ponged => {
                            if InFlight::complete(&mut in_flight.pongs) {
                                session.on_completion(Completion::Ponged(Ok(())));
                            }
                        }
                        Step::PeerPing => session.on_completion(control(ControlKind::Ping)),
                        Step::PeerPong => session.on_completion(control(ControlKind::Pong)),
                        Step::Push(data) => session.push(&data),
                        Step::DoRead => session.do_read(),
                        Step::DoPing => session.do_ping(Bytes::new()),
                        Step::DoPong => session.do_pong(Bytes::new()),
                    }

                    in_flight.record(log.take())?;
                    prop_assert!(in_flight.reads <= 1, "{:?}", in_flight);
                    prop_assert!(in_flight.writes <= 1, "{:?}", in_flight);
                    prop_assert!(in_flight.reads + in_flight.writes >= 1, "session went idle");
                    prop_assert_eq!(session.is_readable(), in_flight.reads == 0);
                    prop_assert_eq!(session.is_writing(), in_flight.writes == 1);
                    prop_assert!(session.is_writing() || session.output.is_empty());
                    prop_assert_eq!(session.pending_ops(), in_flight.total());
                    prop_assert!(!session.is_closed());
                }
            }
        }
    }
}
