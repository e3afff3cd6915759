use anyhow::{Context, Result, anyhow};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::{Arc, Mutex};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Error as TungsteniteError, Message,
        error::ProtocolError,
        handshake::server::{Request, Response},
    },
};
use tracing::{debug, error, info, warn};

use crate::config::RelaySettings;
use crate::dial::{self, DialError};
use crate::dns::{DnsChannel, DohClient, Resolve};
use crate::early_data;
use crate::header::{self, Command};
use crate::security::parse_original_client_ip;
use crate::stream::InboundStream;

pub const BUFFER_SIZE: usize = 8192;

type WsSender<S> = SplitSink<WebSocketStream<S>, Message>;
type WsReceiver<S> = SplitStream<WebSocketStream<S>>;

/// Session lifecycle, tracked for logging. `Retrying` loops back into
/// `Dialing` against the fallback address at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingHeader,
    HeaderParsed,
    Dialing,
    Relaying,
    Retrying,
    Closed,
}

/// Accepts the WebSocket upgrade on an inbound stream and drives one relay
/// session over it.
///
/// The upgrade callback captures the optional `sec-websocket-protocol`
/// header (0-RTT early data) and echoes it back so strict clients accept
/// the handshake, and pulls the original client IP out of
/// `X-Forwarded-For` for logging.
#[tracing::instrument(skip(stream, settings, resolver), fields(client_addr = ?stream.peer_addr().ok()))]
pub async fn handle_connection(
    stream: InboundStream,
    settings: Arc<RelaySettings>,
    resolver: DohClient,
) -> Result<()> {
    let protocol_header = Arc::new(Mutex::new(None::<String>));
    let protocol_header_clone = protocol_header.clone();

    let client_ip = Arc::new(Mutex::new(None::<String>));
    let client_ip_clone = client_ip.clone();

    let callback = move |req: &Request, mut response: Response| {
        if let Some(proto) = req.headers().get("sec-websocket-protocol") {
            if let Ok(proto_str) = proto.to_str() {
                if let Ok(mut guard) = protocol_header_clone.lock() {
                    *guard = Some(proto_str.to_string());
                }
                response
                    .headers_mut()
                    .insert("sec-websocket-protocol", proto.clone());
            }
        }

        if let Some(xff) = req.headers().get("x-forwarded-for") {
            if let Ok(xff_str) = xff.to_str() {
                if let Some(original_ip) = parse_original_client_ip(xff_str) {
                    if let Ok(mut guard) = client_ip_clone.lock() {
                        *guard = Some(original_ip);
                    }
                }
            }
        }

        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .context("Failed to perform WebSocket handshake")?;

    let early_header = protocol_header.lock().unwrap().clone();
    let early_data = early_data::decode(early_header.as_deref())
        .context("Rejecting session with corrupt early data")?;

    if let Some(ip) = client_ip.lock().unwrap().as_ref() {
        info!(client_ip = %ip, "Accepted relay connection");
    }

    run_session(ws_stream, early_data, &settings, &resolver).await
}

/// Drives one logical proxy connection end-to-end: header parse, outbound
/// dial (with one fallback retry), and the bidirectional byte relay.
pub async fn run_session<S, R>(
    websocket: WebSocketStream<S>,
    early_data: Vec<u8>,
    settings: &RelaySettings,
    resolver: &R,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Resolve + Sync,
{
    let mut state = SessionState::AwaitingHeader;
    let (mut ws_sender, mut ws_receiver) = websocket.split();

    let result = drive_session(
        &mut ws_sender,
        &mut ws_receiver,
        early_data,
        settings,
        resolver,
        &mut state,
    )
    .await;

    state = SessionState::Closed;
    debug!(state = ?state, "Session finished");
    // Best-effort close; the peer may already have closed its side.
    let _ = ws_sender.close().await;
    result
}

async fn drive_session<S, R>(
    ws_sender: &mut WsSender<S>,
    ws_receiver: &mut WsReceiver<S>,
    early_data: Vec<u8>,
    settings: &RelaySettings,
    resolver: &R,
    state: &mut SessionState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Resolve + Sync,
{
    let Some(first_frame) = read_first_frame(ws_receiver, early_data).await? else {
        info!("Client closed before sending a handshake");
        return Ok(());
    };

    let request = header::parse_header(&first_frame, &settings.accepted_ids)
        .map_err(|e| anyhow!(e).context("Rejecting session with invalid handshake header"))?;
    *state = SessionState::HeaderParsed;

    info!(
        target_addr = %format!("{}:{}", request.address, request.port),
        command = ?request.command,
        "Handshake parsed"
    );

    let first_payload = first_frame[request.payload_offset..].to_vec();
    let response_header = request.response_header();

    match request.command {
        Command::Udp => {
            if request.port != 53 {
                return Err(anyhow!("UDP relay is only enabled for DNS (port 53)"));
            }
            run_dns_channel(
                ws_sender,
                ws_receiver,
                &first_payload,
                response_header,
                resolver,
            )
            .await
        }
        Command::Tcp => {
            relay_tcp_with_fallback(
                ws_sender,
                ws_receiver,
                &request.address,
                request.port,
                &first_payload,
                response_header,
                settings,
                state,
            )
            .await
        }
    }
}

/// Buffers inbound messages until the first non-empty binary frame arrives.
/// Early data, when present, is that first frame. Returns `None` if the
/// client closes before sending one.
async fn read_first_frame<S>(
    ws_receiver: &mut WsReceiver<S>,
    early_data: Vec<u8>,
) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !early_data.is_empty() {
        return Ok(Some(early_data));
    }

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) if !data.is_empty() => return Ok(Some(data.to_vec())),
            Ok(Message::Binary(_)) => {}
            Ok(Message::Close(_)) => return Ok(None),
            Ok(Message::Text(_)) => {
                warn!("Dropping text message before handshake (binary only)");
            }
            Ok(_) => {}
            Err(e) => return Err(e).context("WebSocket error while awaiting handshake"),
        }
    }
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
async fn relay_tcp_with_fallback<S>(
    ws_sender: &mut WsSender<S>,
    ws_receiver: &mut WsReceiver<S>,
    address: &str,
    port: u16,
    first_payload: &[u8],
    response_header: [u8; 2],
    settings: &RelaySettings,
    state: &mut SessionState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let suffix = settings.wildcard_dns_suffix.as_deref();
    let mut pending_header = Some(response_header);

    *state = SessionState::Dialing;
    let target = dial::rewrite_ip_literal(address, suffix);
    let tcp_stream = dial::connect_and_write(&target, port, first_payload).await?;

    *state = SessionState::Relaying;
    match relay(ws_sender, ws_receiver, tcp_stream, &mut pending_header).await? {
        RelayOutcome::Done => return Ok(()),
        RelayOutcome::NoData => {}
    }

    // The destination accepted the connection but sent nothing before
    // closing; retry exactly once through the configured fallback.
    let Some(fallback) = settings.fallback.as_ref() else {
        return Err(DialError::ZeroBytesReceived)
            .context("Destination sent no data and no fallback is configured");
    };

    *state = SessionState::Retrying;
    warn!(
        fallback_addr = %format!("{}:{}", fallback.host, fallback.port),
        "No data from destination, retrying via fallback"
    );

    *state = SessionState::Dialing;
    let target = dial::rewrite_ip_literal(&fallback.host, suffix);
    let tcp_stream = dial::connect_and_write(&target, fallback.port, first_payload).await?;

    *state = SessionState::Relaying;
    match relay(ws_sender, ws_receiver, tcp_stream, &mut pending_header).await? {
        RelayOutcome::Done => Ok(()),
        RelayOutcome::NoData => Err(DialError::ZeroBytesReceived)
            .context("Fallback destination also sent no data"),
    }
}

enum RelayOutcome {
    /// The relay ran to completion: either side closed after the
    /// destination had sent at least one byte, or the client hung up.
    Done,
    /// The destination closed or errored without sending a single byte.
    NoData,
}

enum RelayEnd {
    Inbound,
    Outbound,
}

/// Pumps bytes in both directions until one side finishes. The pending
/// 2-byte response header is prepended to exactly the first chunk sent
/// back to the client; everything after is a pure byte relay.
async fn relay<S>(
    ws_sender: &mut WsSender<S>,
    ws_receiver: &mut WsReceiver<S>,
    tcp_stream: TcpStream,
    pending_header: &mut Option<[u8; 2]>,
) -> Result<RelayOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut tcp_reader, mut tcp_writer) = tcp_stream.into_split();
    let mut received_any = false;

    let ws_to_tcp = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    debug!(bytes = data.len(), "Forwarding data from WebSocket to TCP");
                    if let Err(e) = tcp_writer.write_all(&data).await {
                        // The destination died mid-write; let the outbound
                        // side's verdict (data or no data) decide what
                        // happens next.
                        debug!(error = %e, "Destination write failed");
                        return Ok(RelayEnd::Outbound);
                    }
                }
                Ok(Message::Text(_)) => {
                    warn!("Dropping text message (binary only)");
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    match e {
                        TungsteniteError::ConnectionClosed
                        | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) =>
                        {
                            debug!("Client disconnected: {e}");
                        }
                        _ => {
                            error!("WebSocket error: {e}");
                        }
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok::<_, anyhow::Error>(RelayEnd::Inbound)
    };

    let tcp_to_ws = async {
        let mut buffer = [0u8; BUFFER_SIZE];

        loop {
            match tcp_reader.read(&mut buffer).await {
                Ok(0) => {
                    info!("TCP connection closed");
                    break;
                }
                Ok(n) => {
                    received_any = true;
                    debug!(bytes = n, "Forwarding data from TCP to WebSocket");
                    let payload = match pending_header.take() {
                        Some(header) => {
                            let mut chunk = Vec::with_capacity(n + 2);
                            chunk.extend_from_slice(&header);
                            chunk.extend_from_slice(&buffer[..n]);
                            chunk
                        }
                        None => buffer[..n].to_vec(),
                    };
                    if let Err(e) = ws_sender.send(Message::Binary(payload.into())).await {
                        error!(error = %e, bytes = n, "Failed to send WebSocket message");
                        return Err(e).context("Failed to send TCP data via WebSocket");
                    }
                }
                Err(e) => {
                    debug!("Failed to read from TCP: {e}");
                    break;
                }
            }
        }
        Ok(RelayEnd::Outbound)
    };

    let end = tokio::select! {
        result = ws_to_tcp => result?,
        result = tcp_to_ws => result?,
    };

    match end {
        RelayEnd::Inbound => Ok(RelayOutcome::Done),
        RelayEnd::Outbound if received_any => Ok(RelayOutcome::Done),
        RelayEnd::Outbound => Ok(RelayOutcome::NoData),
    }
}

/// Runs the UDP/DNS sub-channel: every inbound chunk is length-prefixed
/// DNS datagrams, resolved one by one over DoH. Per-datagram failures are
/// logged inside the channel and never end the session.
async fn run_dns_channel<S, R>(
    ws_sender: &mut WsSender<S>,
    ws_receiver: &mut WsReceiver<S>,
    first_payload: &[u8],
    response_header: [u8; 2],
    resolver: &R,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Resolve + Sync,
{
    let mut channel = DnsChannel::new(resolver, response_header);

    for frame in channel.feed(first_payload).await {
        ws_sender
            .send(Message::Binary(frame.into()))
            .await
            .context("Failed to send DNS answer via WebSocket")?;
    }

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                for frame in channel.feed(&data).await {
                    ws_sender
                        .send(Message::Binary(frame.into()))
                        .await
                        .context("Failed to send DNS answer via WebSocket")?;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed");
                break;
            }
            Ok(Message::Text(_)) => {
                warn!("Dropping text message (binary only)");
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Client disconnected: {e}");
                break;
            }
        }
    }
    Ok(())
}
