use std::fmt;

use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{SessionError, TransportError};
use crate::header::parse_header;
use crate::relay::{RelayEnd, RelayOptions, relay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFrame,
    /// Header decoded and its identifier accepted.
    HeaderParsed,
    Dialed,
    Relaying,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingFrame => "awaiting_frame",
            Self::HeaderParsed => "header_parsed",
            Self::Dialed => "dialed",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// The state a successful step leads to. Failures go straight to `Closed`.
    #[must_use]
    pub const fn successor(self) -> Self {
        match self {
            Self::AwaitingFrame => Self::HeaderParsed,
            Self::HeaderParsed => Self::Dialed,
            Self::Dialed => Self::Relaying,
            Self::Relaying | Self::Closed => Self::Closed,
        }
    }
}

struct Tracker(SessionState);

impl Tracker {
    fn advance(&mut self, next: SessionState) {
        debug_assert_eq!(self.0.successor(), next, "skipped a session state");
        debug!(from = %self.0, to = %next, "Session state change");
        self.0 = next;
    }
}

/// Waits for the first binary message. Other message types are skipped.
async fn await_header_frame<Rx>(ws_rx: &mut Rx) -> Result<Bytes, SessionError>
where
    Rx: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg.map_err(|e| SessionError::Handshake(e.into()))? {
            Message::Binary(data) => return Ok(data),
            Message::Close(_) => break,
            Message::Text(_) => warn!("Received non-binary message"),
            _ => {}
        }
    }
    Err(SessionError::ClosedBeforeHandshake)
}

/// Runs one tunnel session over an accepted WebSocket.
///
/// Returns once the relay ends or any step before it fails. Both transports
/// are closed on return.
#[tracing::instrument(skip_all)]
pub async fn run_session<S>(
    websocket: WebSocketStream<S>,
    config: &GatewayConfig,
) -> Result<RelayEnd, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = Tracker(SessionState::AwaitingFrame);
    let (mut ws_tx, mut ws_rx) = websocket.split();

    let frame = await_header_frame(&mut ws_rx).await?;

    let header = parse_header(&frame, &config.identifier)?;
    state.advance(SessionState::HeaderParsed);
    let target = &header.target;
    info!(
        target_host = %target.host,
        target_port = target.port,
        atyp = target.atyp.tag(),
        "Connection details"
    );

    let tcp_stream = TcpStream::connect(target.dial_addr())
        .await
        .map_err(|source| SessionError::Dial {
            target: target.to_string(),
            source,
        })?;
    state.advance(SessionState::Dialed);
    info!(target_addr = %target, "Connected to target server");

    ws_tx
        .send(Message::Binary(header.ack().to_vec().into()))
        .await
        .map_err(|e| SessionError::Handshake(e.into()))?;

    let (mut tcp_rx, mut tcp_tx) = tcp_stream.into_split();
    let payload = header.payload(&frame);
    if !payload.is_empty() {
        debug!(bytes = payload.len(), "Forwarding initial payload to TCP");
        tcp_tx
            .write_all(payload)
            .await
            .map_err(|e| SessionError::Transport(TransportError::Io(e)))?;
    }

    state.advance(SessionState::Relaying);
    let options = RelayOptions {
        buffer_size: config.buffer_size,
        idle_timeout: config.idle_timeout,
    };
    let result = relay(&mut ws_tx, &mut ws_rx, &mut tcp_rx, &mut tcp_tx, options).await;

    if let Err(e) = ws_tx.close().await {
        debug!(error = %e, "WebSocket close during teardown failed");
    }
    if let Err(e) = tcp_tx.shutdown().await {
        debug!(error = %e, "TCP shutdown during teardown failed");
    }
    state.advance(SessionState::Closed);

    result.map_err(SessionError::Transport)
}
