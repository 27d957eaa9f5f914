use std::{io, time::Duration};

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, error::ProtocolError};

/// Failures while decoding the handshake header. Nothing has been dialed or
/// acknowledged when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("frame too short: need {needed} bytes, got {actual}")]
    FrameTooShort { needed: usize, actual: usize },
    #[error("unknown address type {0}")]
    UnknownAddressType(u8),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("domain name is not valid UTF-8")]
    InvalidDomain,
}

/// Read or write failure on either side of an established session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("tcp error: {0}")]
    Io(#[from] io::Error),
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),
}

impl TransportError {
    /// True for errors that are just a peer going away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::WebSocket(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake),
            ) => true,
            Self::WebSocket(tungstenite::Error::Io(e)) | Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),
    #[error("failed to connect to target {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("handshake failed: {0}")]
    Handshake(#[source] TransportError),
    #[error("relay ended: {0}")]
    Transport(#[source] TransportError),
    #[error("client closed before sending a header")]
    ClosedBeforeHandshake,
}

impl SessionError {
    /// Errors that are a normal way for a session to end.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::ClosedBeforeHandshake => true,
            Self::Transport(e) | Self::Handshake(e) => e.is_disconnect(),
            _ => false,
        }
    }
}
