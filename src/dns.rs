use anyhow::{Context, Result, ensure};
use tracing::{debug, warn};

/// Resolves one raw DNS query message to its raw answer.
pub trait Resolve {
    fn resolve(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl<R: Resolve + Sync> Resolve for &R {
    fn resolve(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send {
        (**self).resolve(query)
    }
}

/// DNS-over-HTTPS resolver posting wire-format queries to a DoH endpoint.
#[derive(Clone)]
pub struct DohClient {
    http: reqwest::Client,
    url: String,
}

impl DohClient {
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

impl Resolve for DohClient {
    fn resolve(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send {
        let request = self
            .http
            .post(&self.url)
            .header("content-type", "application/dns-message")
            .body(query.to_vec());
        let url = self.url.clone();
        async move {
            let response = request
                .send()
                .await
                .with_context(|| format!("DoH request to {url} failed"))?;
            ensure!(
                response.status().is_success(),
                "DoH endpoint {url} returned status {}",
                response.status()
            );
            let body = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read DoH response body from {url}"))?;
            Ok(body.to_vec())
        }
    }
}

/// Reassembles `[u16 big-endian length][payload]` datagram frames from a
/// byte stream. Partial trailing data is retained until the next push, so a
/// datagram split across two inbound writes still comes out whole.
#[derive(Default)]
pub struct DatagramBuffer {
    buf: Vec<u8>,
}

impl DatagramBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete datagram, or `None` if more bytes are needed.
    pub fn next_datagram(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < 2 {
            return None;
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if self.buf.len() < 2 + len {
            return None;
        }
        let datagram = self.buf[2..2 + len].to_vec();
        self.buf.drain(..2 + len);
        Some(datagram)
    }
}

/// Per-session DNS sub-channel: turns inbound stream chunks into discrete
/// DNS queries, resolves each, and frames the answers for the client.
///
/// The session's 2-byte response header is prepended to the first answer
/// frame only. A failed resolution drops that datagram with a log line and
/// leaves the channel usable.
pub struct DnsChannel<R> {
    resolver: R,
    buffer: DatagramBuffer,
    response_header: Option<[u8; 2]>,
}

impl<R: Resolve> DnsChannel<R> {
    pub fn new(resolver: R, response_header: [u8; 2]) -> Self {
        Self {
            resolver,
            buffer: DatagramBuffer::new(),
            response_header: Some(response_header),
        }
    }

    /// Feeds one inbound chunk and returns the answer frames to write back,
    /// in order. May return zero frames (incomplete datagram or failed
    /// resolutions).
    pub async fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.push(chunk);

        let mut frames = Vec::new();
        while let Some(query) = self.buffer.next_datagram() {
            match self.resolver.resolve(&query).await {
                Ok(answer) => {
                    debug!(bytes = answer.len(), "DNS query resolved");
                    let mut frame = Vec::with_capacity(answer.len() + 4);
                    if let Some(header) = self.response_header.take() {
                        frame.extend_from_slice(&header);
                    }
                    frame.extend_from_slice(&(answer.len() as u16).to_be_bytes());
                    frame.extend_from_slice(&answer);
                    frames.push(frame);
                }
                Err(e) => {
                    warn!(error = %e, "Dropping DNS datagram after failed resolution");
                }
            }
        }
        frames
    }
}
