//! Client endpoint: TCP connect, then hand the session to `on_connect`.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::TernError;
use crate::session::{ClientHandler, Session, SessionDriver, SessionHandle, SessionId};
use crate::transport::ws::WsConnection;

/// A running client session.
#[derive(Debug)]
pub struct ClientSession {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

impl ClientSession {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Wait for the session to close. The handle is held until then, so
    /// an idle session is not dropped early.
    pub async fn closed(self) -> Result<(), TernError> {
        let Self { handle: _handle, task } = self;
        task.await?;
        Ok(())
    }
}

pub struct Client;

impl Client {
    /// Dial `config.server_address` and start a client session on it.
    ///
    /// `on_connect` runs before this returns; by default it starts the
    /// upgrade handshake on `config.target`.
    pub async fn connect(
        config: ClientConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<ClientSession, TernError> {
        config.session.validate()?;
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(&config.server_address),
        )
        .await
        .map_err(|_| TernError::Timeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!(server = %config.server_address, "connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = WsConnection::spawn(stream, events_tx);
        let session = Session::client(SessionId::next(), conn, handler, &config);

        let mut driver = SessionDriver::new(session, events_rx);
        let handle = driver
            .session_mut()
            .handle()
            .ok_or(TernError::SessionClosed)?;
        driver.session_mut().connected();
        let task = driver.spawn();

        Ok(ClientSession { handle, task })
    }
}
