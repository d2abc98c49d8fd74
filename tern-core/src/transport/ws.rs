//! [`Connection`] over `tokio-tungstenite`.
//!
//! The stream is owned by background tasks; the session talks to them
//! through channels:
//!
//! ```text
//!  session ──ops──► bootstrap task ── accept / handshake ──┐
//!                                                         ▼ split
//!                     reader task ◄── read requests    writer task ◄── write/ping/pong/close
//!                          │                                │
//!                          └────────── completions ─────────┴──► session
//! ```
//!
//! Reads and writes run on separate tasks so a write can drain while a
//! read is parked on the socket. A shared [`CancellationToken`] implements
//! `force_close`: both tasks abort their in-flight operation, report
//! [`TransportError::Aborted`], and drop their half of the stream.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    AcceptParams, CloseReason, Completion, Connection, ControlFrame, ControlKind, Frame,
    FrameKind, HandshakeParams, HeaderName, HeaderValue, StatusCode, UpgradeResponse,
};
use crate::error::TransportError;

pub type CompletionSender = mpsc::UnboundedSender<Completion>;

enum Establish {
    Accept(AcceptParams),
    Handshake(HandshakeParams),
}

enum WriteOp {
    Data(Bytes, FrameKind),
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseReason),
}

impl WriteOp {
    fn aborted(&self) -> Completion {
        match self {
            WriteOp::Data(..) => Completion::Written(Err(TransportError::Aborted)),
            WriteOp::Ping(_) => Completion::Pinged(Err(TransportError::Aborted)),
            WriteOp::Pong(_) => Completion::Ponged(Err(TransportError::Aborted)),
            WriteOp::Close(_) => Completion::Closed(Err(TransportError::Aborted)),
        }
    }
}

// ── WsConnection ─────────────────────────────────────────────────

/// Handle to a WebSocket stream serviced by background tasks.
pub struct WsConnection {
    establish: mpsc::UnboundedSender<Establish>,
    reads: mpsc::UnboundedSender<()>,
    writes: mpsc::UnboundedSender<WriteOp>,
    completions: CompletionSender,
    cancel: CancellationToken,
}

impl WsConnection {
    /// Take ownership of a raw (not yet upgraded) stream.
    ///
    /// Completions for every operation issued on the returned handle are
    /// delivered on `completions`.
    pub fn spawn<S>(stream: S, completions: CompletionSender) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (establish_tx, establish_rx) = mpsc::unbounded_channel();
        let (reads_tx, reads_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(bootstrap(
            stream,
            establish_rx,
            reads_rx,
            writes_rx,
            completions.clone(),
            cancel.clone(),
        ));

        Self {
            establish: establish_tx,
            reads: reads_tx,
            writes: writes_tx,
            completions,
            cancel,
        }
    }

    /// Whether `force_close` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn complete(&self, completion: Completion) {
        let _ = self.completions.send(completion);
    }

    fn issue_write(&mut self, op: WriteOp) {
        if self.cancel.is_cancelled() {
            return self.complete(op.aborted());
        }
        if let Err(mpsc::error::SendError(op)) = self.writes.send(op) {
            self.complete(op.aborted());
        }
    }
}

impl Connection for WsConnection {
    fn accept(&mut self, params: AcceptParams) {
        if self.cancel.is_cancelled() || self.establish.send(Establish::Accept(params)).is_err() {
            self.complete(Completion::Accepted(Err(TransportError::Aborted)));
        }
    }

    fn handshake(&mut self, params: HandshakeParams) {
        if self.cancel.is_cancelled()
            || self.establish.send(Establish::Handshake(params)).is_err()
        {
            self.complete(Completion::Handshaked(Err(TransportError::Aborted)));
        }
    }

    fn read(&mut self) {
        if self.cancel.is_cancelled() || self.reads.send(()).is_err() {
            self.complete(Completion::Read(Err(TransportError::Aborted)));
        }
    }

    fn write(&mut self, data: Bytes, kind: FrameKind) {
        self.issue_write(WriteOp::Data(data, kind));
    }

    fn ping(&mut self, payload: Bytes) {
        self.issue_write(WriteOp::Ping(payload));
    }

    fn pong(&mut self, payload: Bytes) {
        self.issue_write(WriteOp::Pong(payload));
    }

    fn close(&mut self, reason: CloseReason) {
        self.issue_write(WriteOp::Close(reason));
    }

    fn force_close(&mut self) {
        debug!("forcing connection closed");
        self.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn bootstrap<S>(
    stream: S,
    mut establish: mpsc::UnboundedReceiver<Establish>,
    reads: mpsc::UnboundedReceiver<()>,
    writes: mpsc::UnboundedReceiver<WriteOp>,
    completions: CompletionSender,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let request = tokio::select! {
        biased;
        request = establish.recv() => request,
        () = cancel.cancelled() => None,
    };

    let established = match request {
        Some(Establish::Accept(params)) => {
            let result = tokio::select! {
                r = accept(stream, params) => r,
                () = cancel.cancelled() => Err(TransportError::Aborted),
            };
            match result {
                Ok(ws) => {
                    let _ = completions.send(Completion::Accepted(Ok(())));
                    Some(ws)
                }
                Err(e) => {
                    let _ = completions.send(Completion::Accepted(Err(e)));
                    None
                }
            }
        }
        Some(Establish::Handshake(params)) => {
            let result = tokio::select! {
                r = handshake(stream, params) => r,
                () = cancel.cancelled() => Err(TransportError::Aborted),
            };
            match result {
                Ok((ws, response)) => {
                    let _ = completions.send(Completion::Handshaked(Ok(response)));
                    Some(ws)
                }
                Err(e) => {
                    let _ = completions.send(Completion::Handshaked(Err(e)));
                    None
                }
            }
        }
        None => None,
    };

    let Some(ws) = established else {
        // Gated operations never get here, but keep the one-completion rule.
        abort_pending(establish, reads, writes, &completions);
        return;
    };

    let (sink, source) = ws.split();
    tokio::spawn(read_loop(source, reads, completions.clone(), cancel.clone()));
    tokio::spawn(write_loop(sink, writes, completions, cancel));
}

fn abort_pending(
    mut establish: mpsc::UnboundedReceiver<Establish>,
    mut reads: mpsc::UnboundedReceiver<()>,
    mut writes: mpsc::UnboundedReceiver<WriteOp>,
    completions: &CompletionSender,
) {
    establish.close();
    reads.close();
    writes.close();
    while let Ok(request) = establish.try_recv() {
        let _ = completions.send(match request {
            Establish::Accept(_) => Completion::Accepted(Err(TransportError::Aborted)),
            Establish::Handshake(_) => Completion::Handshaked(Err(TransportError::Aborted)),
        });
    }
    while reads.try_recv().is_ok() {
        let _ = completions.send(Completion::Read(Err(TransportError::Aborted)));
    }
    while let Ok(op) = writes.try_recv() {
        let _ = completions.send(op.aborted());
    }
}

async fn accept<S>(stream: S, params: AcceptParams) -> Result<WebSocketStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let callback = move |request: &Request, mut response: Response| {
        if let Some(path) = &params.path {
            if request.uri().path() != path {
                return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
            }
        }

        if let Some(protocol) = &params.protocol {
            let offered = request
                .headers()
                .get_all(SEC_WEBSOCKET_PROTOCOL)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .any(|p| p.trim() == protocol);
            if !offered {
                return Err(reject(StatusCode::BAD_REQUEST, "missing or invalid subprotocol"));
            }
            if let Ok(value) = HeaderValue::from_str(protocol) {
                response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
        }

        for (name, value) in &params.response_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                response.headers_mut().append(name, value);
            }
        }
        Ok(response)
    };

    Ok(tokio_tungstenite::accept_hdr_async(stream, callback).await?)
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handshake<S>(
    stream: S,
    params: HandshakeParams,
) -> Result<(WebSocketStream<S>, UpgradeResponse), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let url = format!("ws://{}{}", params.host, params.target);
    let mut request = url.into_client_request()?;
    for (name, value) in &params.request_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Failure(format!("request header name: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Failure(format!("request header value: {e}")))?;
        request.headers_mut().append(name, value);
    }

    Ok(tokio_tungstenite::client_async(request, stream).await?)
}

async fn read_loop<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    mut requests: mpsc::UnboundedReceiver<()>,
    completions: CompletionSender,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request = tokio::select! {
            r = requests.recv() => r,
            () = cancel.cancelled() => break,
        };
        if request.is_none() {
            return;
        }

        let result = tokio::select! {
            r = next_frame(&mut source, &completions) => r,
            () = cancel.cancelled() => Err(TransportError::Aborted),
        };
        trace!(ok = result.is_ok(), "read completed");
        let _ = completions.send(Completion::Read(result));
    }

    requests.close();
    while requests.try_recv().is_ok() {
        let _ = completions.send(Completion::Read(Err(TransportError::Aborted)));
    }
}

/// Wait for the next data frame, reporting control frames on the way.
async fn next_frame<S>(
    source: &mut SplitStream<WebSocketStream<S>>,
    completions: &CompletionSender,
) -> Result<Frame, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let control = match source.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return Ok(Frame {
                    kind: FrameKind::Text,
                    data: Bytes::copy_from_slice(text.as_str().as_bytes()),
                });
            }
            Some(Ok(WsMessage::Binary(data))) => {
                return Ok(Frame {
                    kind: FrameKind::Binary,
                    data,
                });
            }
            Some(Ok(WsMessage::Ping(payload))) => ControlFrame {
                kind: ControlKind::Ping,
                payload,
            },
            Some(Ok(WsMessage::Pong(payload))) => ControlFrame {
                kind: ControlKind::Pong,
                payload,
            },
            Some(Ok(WsMessage::Close(frame))) => ControlFrame {
                kind: ControlKind::Close,
                payload: frame
                    .map(|f| Bytes::copy_from_slice(f.reason.as_str().as_bytes()))
                    .unwrap_or_default(),
            },
            Some(Ok(WsMessage::Frame(_))) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed),
        };
        let _ = completions.send(Completion::Control(control));
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut requests: mpsc::UnboundedReceiver<WriteOp>,
    completions: CompletionSender,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let op = tokio::select! {
            op = requests.recv() => op,
            () = cancel.cancelled() => break,
        };
        let Some(op) = op else { return };

        let aborted = op.aborted();
        let completion = tokio::select! {
            c = perform(&mut sink, op) => c,
            () = cancel.cancelled() => aborted,
        };
        let _ = completions.send(completion);
    }

    requests.close();
    while let Ok(op) = requests.try_recv() {
        let _ = completions.send(op.aborted());
    }
}

async fn perform<S>(sink: &mut SplitSink<WebSocketStream<S>, WsMessage>, op: WriteOp) -> Completion
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match op {
        WriteOp::Data(data, kind) => {
            let len = data.len();
            let message = match kind {
                FrameKind::Binary => WsMessage::Binary(data),
                FrameKind::Text => match String::from_utf8(data.to_vec()) {
                    Ok(text) => WsMessage::Text(text.into()),
                    Err(_) => {
                        return Completion::Written(Err(TransportError::Failure(
                            "text frame is not valid utf-8".into(),
                        )));
                    }
                },
            };
            Completion::Written(sink.send(message).await.map(|()| len).map_err(Into::into))
        }
        WriteOp::Ping(payload) => {
            Completion::Pinged(sink.send(WsMessage::Ping(payload)).await.map_err(Into::into))
        }
        WriteOp::Pong(payload) => {
            Completion::Ponged(sink.send(WsMessage::Pong(payload)).await.map_err(Into::into))
        }
        WriteOp::Close(reason) => {
            let frame = CloseFrame {
                code: CloseCode::from(reason.code),
                reason: reason.reason.into(),
            };
            Completion::Closed(
                sink.send(WsMessage::Close(Some(frame)))
                    .await
                    .map_err(Into::into),
            )
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
