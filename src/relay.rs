//! Bidirectional relay between a WebSocket and a TCP stream.
//!
//! Both directions run concurrently inside one `select!`; the first one to
//! finish decides the outcome and the other is dropped. Closing the
//! transports afterwards is up to the caller.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Largest chunk read from TCP and sent as one WebSocket message.
    pub buffer_size: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

/// Which side ended the relay without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    TargetClosed,
}

/// Last time a byte moved in either direction.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

async fn client_to_target<Rx, W>(
    ws_rx: &mut Rx,
    tcp_tx: &mut W,
    activity: &Activity,
) -> Result<RelayEnd, TransportError>
where
    Rx: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg? {
            Message::Binary(data) => {
                activity.touch();
                debug!(bytes = data.len(), "Forwarding data from WebSocket to TCP");
                tcp_tx.write_all(&data).await?;
            }
            Message::Text(_) => {
                warn!("Dropping text message (binary only)");
            }
            Message::Close(_) => {
                info!("WebSocket connection closed");
                return Ok(RelayEnd::ClientClosed);
            }
            _ => {}
        }
    }
    Ok(RelayEnd::ClientClosed)
}

async fn target_to_client<R, Tx>(
    tcp_rx: &mut R,
    ws_tx: &mut Tx,
    buffer_size: usize,
    activity: &Activity,
) -> Result<RelayEnd, TransportError>
where
    R: AsyncRead + Unpin,
    Tx: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        let n = tcp_rx.read(&mut buffer).await?;
        if n == 0 {
            info!("TCP connection closed");
            return Ok(RelayEnd::TargetClosed);
        }
        activity.touch();
        debug!(bytes = n, "Forwarding data from TCP to WebSocket");
        ws_tx.send(Message::Binary(buffer[..n].to_vec().into())).await?;
    }
}

async fn idle_watchdog(
    activity: &Activity,
    limit: Option<Duration>,
) -> Result<RelayEnd, TransportError> {
    let Some(limit) = limit else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= limit {
            return Err(TransportError::IdleTimeout(limit));
        }
        tokio::time::sleep(limit - idle).await;
    }
}

/// Pumps bytes both ways until one direction ends, then returns its outcome.
pub async fn relay<Tx, Rx, R, W>(
    ws_tx: &mut Tx,
    ws_rx: &mut Rx,
    tcp_rx: &mut R,
    tcp_tx: &mut W,
    options: RelayOptions,
) -> Result<RelayEnd, TransportError>
where
    Tx: Sink<Message, Error = tungstenite::Error> + Unpin,
    Rx: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let activity = Activity::new();

    tokio::select! {
        result = client_to_target(ws_rx, tcp_tx, &activity) => result,
        result = target_to_client(tcp_rx, ws_tx, options.buffer_size, &activity) => result,
        result = idle_watchdog(&activity, options.idle_timeout) => result,
    }
}
