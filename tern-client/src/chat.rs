//! Console chat client.
//!
//! Answers the room's name request, then prints every message it is sent
//! as `nick : payload` and posts each console line as a one-message
//! envelope. `/quit` or end of input closes the session.

use std::io::Write;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tern_core::envelope::{self, Envelopes, Message};
use tern_core::{Client, ClientHandler, CloseReason, Session};

use crate::config::ClientConfig;

pub const NAME_REQUEST: &[u8] = b"What is your name?";

pub struct ChatClient {
    nickname: String,
    greeting: String,
    messages: mpsc::UnboundedSender<Message>,
}

impl ChatClient {
    /// Received messages are delivered on the returned channel, which
    /// ends with the session.
    pub fn new(nickname: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let nickname = nickname.into();
        let (messages, rx) = mpsc::unbounded_channel();
        let client = Self {
            greeting: format!("Hello {nickname}"),
            nickname,
            messages,
        };
        (client, rx)
    }

    /// Forward every message in `input`, which may hold several
    /// envelopes back to back.
    fn deliver(&self, session: &Session, input: &[u8]) {
        for batch in Envelopes::new(input) {
            let messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "malformed envelope");
                    e.messages
                }
            };
            for message in messages {
                let _ = self.messages.send(message);
            }
        }
    }
}

impl ClientHandler for ChatClient {
    fn on_handshake(&self, session: &mut Session, _output: &mut BytesMut, _next_read: &mut bool) {
        session.do_read();
    }

    fn on_message(
        &self,
        session: &mut Session,
        input: &[u8],
        output: &mut BytesMut,
        _next_read: &mut bool,
    ) {
        if input == NAME_REQUEST {
            debug!(session = %session.id(), nickname = %self.nickname, "introducing");
            output.extend_from_slice(b"My name is ");
            output.extend_from_slice(self.nickname.as_bytes());
            return;
        }
        match input.strip_prefix(self.greeting.as_bytes()) {
            Some(history) => self.deliver(session, history),
            None => self.deliver(session, input),
        }
    }
}

async fn prompt<R>(lines: &mut tokio::io::Lines<R>, question: &str) -> std::io::Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    print!("{question} ");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.unwrap_or_default().trim().to_string())
}

/// Join the room and relay between it and the console until the session
/// ends.
pub async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let nickname = match config.client.nickname.trim() {
        "" => prompt(&mut lines, "What is your name?").await?,
        name => name.to_string(),
    };
    Message::new("-", nickname.as_str()).validate()?;

    let (handler, mut messages) = ChatClient::new(nickname.clone());
    let session = Client::connect(config.to_core_config(), Arc::new(handler)).await?;
    let handle = session.handle().clone();

    let mut console_open = true;
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => println!("{} : {}", message.nickname, message.payload),
                None => break,
            },
            line = lines.next_line(), if console_open => {
                let line = line?;
                let text = line.as_deref().map(str::trim).unwrap_or("/quit");
                if text == "/quit" {
                    console_open = false;
                    let _ = handle.close(CloseReason::normal());
                    continue;
                }
                if text.is_empty() {
                    continue;
                }
                let data = envelope::serialize(&[Message::new(text, nickname.as_str())])?;
                if handle.push(data).is_err() {
                    break;
                }
            }
        }
    }

    drop(handle);
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
    use tern_core::{Completion, NoopHandler, SessionId};

    fn text(data: Vec<u8>) -> Completion {
        Completion::Read(Ok(Frame {
            kind: FrameKind::Text,
            data: Bytes::from(data),
        }))
    }

    #[test]
    fn joins_and_prints_room_traffic() {
        let (handler, mut messages) = ChatClient::new("Ann");
        let (conn, log) = RecordingConnection::new();
        let config = CoreClientConfig::new("127.0.0.1:9").target("/ws").protocol("chat");
        let mut session = Session::client(SessionId::next(), conn, Arc::new(handler), &config);

        session.connected();
        let mut response = UpgradeResponse::new(None);
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        session.on_completion(Completion::Handshaked(Ok(response)));
        assert_eq!(log.take().last(), Some(&Op::Read));

        session.on_completion(text(NAME_REQUEST.to_vec()));
        assert_eq!(
            log.take(),
            vec![Op::Write(Bytes::from_static(b"My name is Ann"), FrameKind::Text)]
        );
        session.on_completion(Completion::Written(Ok(14)));
        assert_eq!(log.take(), vec![Op::Read]);

        let history = vec![
            Message::new("Input to chat room!", "Bob"),
            Message::new("hi", "Bob"),
            Message::new("Input to chat room!", "Ann"),
        ];
        let mut greeting = b"Hello Ann".to_vec();
        greeting.extend(envelope::serialize(&history).unwrap());
        session.on_completion(text(greeting));
        assert_eq!(log.take(), vec![Op::Read]);
        for expected in &history {
            assert_eq!(&messages.try_recv().unwrap(), expected);
        }

        let pushed = envelope::serialize(&[Message::new("welcome", "Bob")]).unwrap();
        session.on_completion(text(pushed));
        assert_eq!(messages.try_recv().unwrap(), Message::new("welcome", "Bob"));
        assert_eq!(log.take(), vec![Op::Read]);
    }

    #[test]
    fn batched_and_truncated_envelopes() {
        let (handler, mut messages) = ChatClient::new("Ann");
        let (conn, _log) = RecordingConnection::new();
        let session = Session::client(
            SessionId::next(),
            conn,
            Arc::new(NoopHandler),
            &CoreClientConfig::new("127.0.0.1:9"),
        );

        let mut data = envelope::serialize(&[Message::new("first", "Bob")]).unwrap();
        // Declares two records, carries one.
        data.extend_from_slice(b"inv:2:message:2:Bob:hi");
        handler.deliver(&session, &data);

        assert_eq!(messages.try_recv().unwrap(), Message::new("first", "Bob"));
        assert_eq!(messages.try_recv().unwrap(), Message::new("hi", "Bob"));
        assert!(messages.try_recv().is_err());
    }
}
