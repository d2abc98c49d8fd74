//! Server endpoint: turns raw streams into running server sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::TernError;
use crate::registry::SessionRegistry;
use crate::session::{ServerHandler, Session, SessionDriver, SessionId};
use crate::transport::ws::WsConnection;

/// Session factory shared by every connection a listener accepts.
pub struct Server {
    handler: Arc<dyn ServerHandler>,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

impl Server {
    pub fn new(handler: Arc<dyn ServerHandler>, config: ServerConfig) -> Self {
        Self {
            handler,
            config,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Every session this server has started and that is still running.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build a session over `stream`, let `on_done` prime it (normally by
    /// calling [`Session::do_accept`]) and start its driver.
    pub fn upgrade<S, F>(&self, stream: S, on_done: F) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(&mut Session),
    {
        let id = SessionId::next();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = WsConnection::spawn(stream, events_tx);
        let session = Session::server(
            id,
            conn,
            Arc::clone(&self.handler),
            self.config.session.clone(),
        );

        let mut driver =
            SessionDriver::new(session, events_rx).register(Arc::clone(&self.registry));
        on_done(driver.session_mut());
        driver.spawn();
        id
    }

    /// [`upgrade`](Self::upgrade) with the configured accept policy.
    pub fn accept<S>(&self, stream: S) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let params = self.config.accept.clone();
        self.upgrade(stream, move |session| session.do_accept(params))
    }

    /// Accept TCP connections until `shutdown` is cancelled.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), TernError> {
        info!(addr = %listener.local_addr()?, "listening");
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
                () = shutdown.cancelled() => break,
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "set_nodelay failed");
            }
            let id = self.accept(stream);
            debug!(session = %id, %peer, "connection accepted");
        }
        info!(sessions = self.registry.len(), "listener stopped");
        Ok(())
    }

    /// Bind `addr` and [`serve`](Self::serve) on it.
    pub async fn bind_and_serve(
        &self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), TernError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }
}
