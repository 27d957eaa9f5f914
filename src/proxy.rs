use anyhow::Result;
use hyper::{
    Request, StatusCode, header, server::conn::http1, service::service_fn, upgrade::Upgraded,
};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Role};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::http::{Body, is_websocket_upgrade, liveness_response, switching_protocols, text_response};
use crate::security::{is_peer_allowed, parse_original_client_ip};
use crate::session::run_session;

async fn run_tunnel(upgraded: Upgraded, config: &GatewayConfig) {
    let ws_stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

    match run_session(ws_stream, config).await {
        Ok(end) => info!(?end, "Proxy connection closed"),
        Err(e) if e.is_expected() => debug!(error = %e, "Proxy connection closed"),
        Err(e) => warn!(error = %e, "Proxy session failed"),
    }
}

/// Serves the single catch-all endpoint: WebSocket upgrades start a tunnel
/// session, anything else gets the liveness message.
pub async fn handle_request<B>(
    mut req: Request<B>,
    config: Arc<GatewayConfig>,
) -> Result<hyper::Response<Body>, Infallible> {
    if !is_websocket_upgrade(req.headers()) {
        debug!(method = %req.method(), path = %req.uri().path(), "Serving liveness response");
        return Ok(liveness_response());
    }

    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY).cloned() else {
        warn!("Upgrade request without Sec-WebSocket-Key");
        return Ok(text_response(
            StatusCode::BAD_REQUEST,
            "Missing Sec-WebSocket-Key",
        ));
    };

    let forwarded_ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(parse_original_client_ip);
    let path = req.uri().path().to_string();
    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(
        async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    warn!(error = %e, "WebSocket upgrade failed");
                    return;
                }
            };
            match forwarded_ip {
                Some(ref ip) => {
                    info!(path = %path, client_ip = %ip, "New WebSocket connection established");
                }
                None => info!(path = %path, "New WebSocket connection established"),
            }
            run_tunnel(upgraded, &config).await;
        }
        .in_current_span(),
    );

    Ok(switching_protocols(&key))
}

/// Handles one accepted connection as an HTTP/1.1 server with upgrades.
#[tracing::instrument(skip_all, fields(client_addr = %client_addr))]
pub async fn handle_connection(
    stream: TcpStream,
    client_addr: SocketAddr,
    config: Arc<GatewayConfig>,
) -> Result<()> {
    if !is_peer_allowed(client_addr.ip(), config.allowed_proxy_ips.as_deref()) {
        warn!("Rejecting connection from address outside allowed_proxy_ips");
        return Ok(());
    }

    let service = service_fn(move |req| handle_request(req, Arc::clone(&config)));
    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await?;
    Ok(())
}

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, config: Arc<GatewayConfig>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };
        let config = Arc::clone(&config);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, config).await {
                error!(client_addr = %addr, error = %e, "Connection failed");
            }
        });
    }
}
