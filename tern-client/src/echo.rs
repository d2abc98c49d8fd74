//! Echo probe: greet the server, print what comes back, close.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::debug;

use tern_core::{Client, ClientHandler, CloseReason, Session};

use crate::config::ClientConfig;

pub struct EchoClient {
    greeting: String,
    replies: mpsc::UnboundedSender<String>,
}

impl EchoClient {
    /// Replies are delivered on the returned channel, which ends with the
    /// session.
    pub fn new(greeting: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (replies, rx) = mpsc::unbounded_channel();
        let client = Self {
            greeting: greeting.into(),
            replies,
        };
        (client, rx)
    }
}

impl ClientHandler for EchoClient {
    fn on_handshake(&self, session: &mut Session, output: &mut BytesMut, _next_read: &mut bool) {
        debug!(session = %session.id(), "sending greeting");
        output.extend_from_slice(self.greeting.as_bytes());
    }

    fn on_message(
        &self,
        session: &mut Session,
        input: &[u8],
        _output: &mut BytesMut,
        next_read: &mut bool,
    ) {
        let _ = self.replies.send(String::from_utf8_lossy(input).into_owned());
        *next_read = false;
        session.do_close(CloseReason::normal());
    }
}

/// Connect, run one echo exchange and print the reply.
pub async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (handler, mut replies) = EchoClient::new(config.client.greeting.clone());
    let session = Client::connect(config.to_core_config(), Arc::new(handler)).await?;

    while let Some(reply) = replies.recv().await {
        println!("{reply}");
    }
    session.closed().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tern_core::ClientConfig as CoreClientConfig;
    use tern_core::transport::mock::{Op, RecordingConnection};
    use tern_core::transport::{Frame, FrameKind, StatusCode, UpgradeResponse};
    use tern_core::{Completion, SessionId};

    #[test]
    fn greets_then_closes_on_reply() {
        let (handler, mut replies) = EchoClient::new("hello!");
        let (conn, log) = RecordingConnection::new();
        let config = CoreClientConfig::new("127.0.0.1:9").target("/echo");
        let mut session = Session::client(SessionId::next(), conn, Arc::new(handler), &config);

        session.connected();
        assert_eq!(
            log.take(),
            vec![Op::Handshake {
                host: "127.0.0.1:9".into(),
                target: "/echo".into()
            }]
        );

        let mut response = UpgradeResponse::new(None);
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        session.on_completion(Completion::Handshaked(Ok(response)));
        assert_eq!(
            log.take(),
            vec![Op::Write(Bytes::from_static(b"hello!"), FrameKind::Text)]
        );

        session.on_completion(Completion::Written(Ok(6)));
        assert_eq!(log.take(), vec![Op::Read]);

        session.on_completion(Completion::Read(Ok(Frame {
            kind: FrameKind::Text,
            data: Bytes::from_static(b"hello!"),
        })));
        assert_eq!(log.take(), vec![Op::Close(1000)]);
        assert_eq!(replies.try_recv().unwrap(), "hello!");

        session.on_completion(Completion::Closed(Ok(())));
        assert!(session.is_closed());
    }
}
