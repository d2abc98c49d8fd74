//! The task that owns a running [`Session`].
//!
//! A driver multiplexes three sources into the session, strictly one at a
//! time:
//!
//! - completions and control frames from the connection,
//! - commands posted through [`SessionHandle`]s,
//! - the watchdog deadline.
//!
//! # Lifetime
//!
//! The session keeps only a weak reference to its command channel. While
//! any operation is outstanding the driver pins a strong one, so the
//! session stays alive until its I/O settles. The driver stops when no
//! operation is outstanding and either the session is closed or every
//! external [`SessionHandle`] has been dropped.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{Session, SessionId};
use crate::error::TernError;
use crate::registry::SessionRegistry;
use crate::transport::{CloseReason, Completion};

// ── SessionCommand ───────────────────────────────────────────────

/// Work posted to a session from outside its driver.
pub enum SessionCommand {
    /// Queue bytes and write them.
    Push(Bytes),
    /// Issue a read (guarded like [`Session::do_read`]).
    Read,
    Ping(Bytes),
    Close(CloseReason),
    /// Run arbitrary code against the session.
    Run(Box<dyn FnOnce(&mut Session) + Send>),
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push(data) => write!(f, "Push({} bytes)", data.len()),
            Self::Read => write!(f, "Read"),
            Self::Ping(_) => write!(f, "Ping"),
            Self::Close(reason) => write!(f, "Close({})", reason.code),
            Self::Run(_) => write!(f, "Run"),
        }
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable, `Send` reference to a running session.
///
/// Holding one keeps the session alive even when it has nothing in
/// flight. Every method fails with [`TernError::SessionClosed`] once the
/// driver has stopped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue `data` for writing.
    pub fn push(&self, data: impl Into<Bytes>) -> Result<(), TernError> {
        self.send(SessionCommand::Push(data.into()))
    }

    pub fn read(&self) -> Result<(), TernError> {
        self.send(SessionCommand::Read)
    }

    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<(), TernError> {
        self.send(SessionCommand::Ping(payload.into()))
    }

    pub fn close(&self, reason: CloseReason) -> Result<(), TernError> {
        self.send(SessionCommand::Close(reason))
    }

    /// Run `f` on the session's driver task.
    pub fn run<F>(&self, f: F) -> Result<(), TernError>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        self.send(SessionCommand::Run(Box::new(f)))
    }

    /// Whether the driver has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: SessionCommand) -> Result<(), TernError> {
        self.tx.send(command)?;
        Ok(())
    }
}

// ── SessionDriver ────────────────────────────────────────────────

/// A session wired to its channels, ready to be spawned.
pub struct SessionDriver {
    session: Session,
    events: mpsc::UnboundedReceiver<Completion>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    /// Strong sender held while operations are outstanding.
    pin: Option<mpsc::UnboundedSender<SessionCommand>>,
    registry: Option<Arc<SessionRegistry>>,
}

impl SessionDriver {
    /// Attach `session` to the completion stream of its connection.
    pub fn new(mut session: Session, events: mpsc::UnboundedReceiver<Completion>) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        session.commands = Some(tx.downgrade());
        Self {
            session,
            events,
            commands,
            pin: Some(tx),
            registry: None,
        }
    }

    /// List the session in `registry` until the driver stops.
    pub fn register(mut self, registry: Arc<SessionRegistry>) -> Self {
        if let Some(tx) = &self.pin {
            registry.insert(self.session.id(), tx.downgrade());
        }
        self.registry = Some(registry);
        self
    }

    /// The session, before it starts running.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let id = self.session.id();
        debug!(session = %id, role = ?self.session.role(), "driver started");

        loop {
            if self.session.pending_ops() > 0 {
                if self.pin.is_none() {
                    self.pin = self.session.commands.as_ref().and_then(|w| w.upgrade());
                }
            } else {
                self.pin = None;
                if self.session.is_closed() {
                    break;
                }
            }

            let deadline = self.session.next_deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(completion) => self.session.on_completion(completion),
                    None => {
                        self.session.transport_lost();
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.session.apply(command),
                    None => break,
                },
                () = sleep_until(deadline) => self.session.fire_timer(Instant::now()),
            }
        }

        self.session.end();
        if let Some(registry) = &self.registry {
            registry.remove(id);
        }
        debug!(session = %id, phase = %self.session.phase(), "driver stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
