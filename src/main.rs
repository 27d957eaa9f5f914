use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use ws_tunnel_gateway::{load_config, serve};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let gateway = config.gateway()?;
    info!(
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        buffer_size = gateway.buffer_size,
        idle_timeout = ?gateway.idle_timeout,
        allowlist = gateway.allowed_proxy_ips.is_some(),
        "Configuration loaded"
    );

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(listen_addr = %addr, "Server is running");

    serve(listener, Arc::new(gateway)).await;
    Ok(())
}
