use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use vless_ws_relay::{
    DohClient, InboundStream, handle_connection, is_proxy_ip_allowed, load_config, load_tls_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let settings = config.relay.resolve()?;
    let resolver = DohClient::new(settings.doh_url.clone());

    info!(
        config_file = "config.toml",
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        accepted_ids = settings.accepted_ids.len(),
        fallback = ?settings.fallback.as_ref().map(|f| format!("{}:{}", f.host, f.port)),
        doh_url = %settings.doh_url,
        "Configuration loaded"
    );

    let tls_acceptor = config
        .listen
        .tls
        .as_ref()
        .map(|tls| -> Result<TlsAcceptor> {
            let server_config = load_tls_config(tls)?;
            Ok(TlsAcceptor::from(Arc::new(server_config)))
        })
        .transpose()?;

    let addr = format!("{}:{}", config.listen.ip, config.listen.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(
        listen_addr = %addr,
        tls = tls_acceptor.is_some(),
        "Relay listening"
    );

    let allowed_proxy_ips = config.listen.allowed_proxy_ips;

    while let Ok((stream, peer_addr)) = listener.accept().await {
        match is_proxy_ip_allowed(peer_addr.ip(), allowed_proxy_ips.as_ref()) {
            Ok(true) => {}
            Ok(false) => {
                warn!(peer_addr = %peer_addr, "Rejecting connection from disallowed proxy IP");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Invalid allowed_proxy_ips configuration");
                continue;
            }
        }

        let settings = settings.clone();
        let resolver = resolver.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let inbound = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => InboundStream::Tls(Box::new(tls_stream)),
                    Err(e) => {
                        warn!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => InboundStream::Plain(stream),
            };

            if let Err(e) = handle_connection(inbound, settings, resolver).await {
                error!(client_addr = %peer_addr, error = %e, "Connection failed");
            }
        });
    }

    Ok(())
}
