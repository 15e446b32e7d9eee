//! HTTP+SSE transport for remote MCP servers
//!
//! This module implements [`SseTransport`], the HTTP with Server-Sent Events
//! transport:
//!
//! - A long-lived `GET` on the configured URL (`Accept: text/event-stream`)
//!   carries every inbound message.
//! - The first `endpoint` event names the URL (resolved against the stream
//!   URL) that outbound messages are `POST`ed to.
//! - Responses and server notifications arrive as `message` events (or
//!   events with no name) whose `data` is one JSON-RPC object.
//!
//! `ping` events, `[PING]` data, and `:` comment lines are discarded.
//!
//! # Reconnection
//!
//! When the event stream drops, it is reopened with exponential backoff and
//! the last seen event id is sent as `Last-Event-ID`. The retry counter
//! resets once a reopened stream delivers an event. When retries are
//! exhausted the failure is recorded, the inbound stream ends, and further
//! sends fail.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportKind};
use crate::retry::Backoff;

/// How long to wait for the server's `endpoint` event after connecting.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

type FailureSlot = Arc<std::sync::Mutex<Option<String>>>;

/// A single parsed server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` name, if any.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if any.
    pub id: Option<String>,
}

/// How an event stream ended.
#[derive(Debug, Default)]
pub struct SseStreamEnd {
    /// Number of events parsed before the stream ended.
    pub events: usize,
    /// Read error that ended the stream, if it did not end cleanly.
    pub error: Option<String>,
}

/// HTTP+SSE MCP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use mcphost::mcp::transport::sse::SseTransport;
/// use mcphost::retry::Backoff;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = SseTransport::connect(
///     url::Url::parse("http://localhost:8000/sse")?,
///     HashMap::new(),
///     Backoff::default(),
///     Duration::from_secs(30),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    sse_url: Url,
    headers: HashMap<String, String>,
    endpoint: watch::Receiver<Option<Url>>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    failure: FailureSlot,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    ///
    /// # Arguments
    ///
    /// * `sse_url` - URL of the event stream.
    /// * `headers` - Extra headers added to the GET and every POST.
    /// * `backoff` - Reconnect policy for the event stream.
    /// * `request_timeout` - Timeout for each POST and for connecting.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] if the stream cannot be opened
    /// within the reconnect budget or no `endpoint` event arrives within
    /// [`ENDPOINT_TIMEOUT`].
    pub async fn connect(
        sse_url: Url,
        headers: HashMap<String, String>,
        backoff: Backoff,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("mcphost/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| McpHostError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let failure: FailureSlot = Arc::new(std::sync::Mutex::new(None));
        let cancel = CancellationToken::new();

        let task = EventStreamTask {
            client: http_client.clone(),
            sse_url: sse_url.clone(),
            headers: headers.clone(),
            backoff,
            endpoint_tx,
            response_tx,
            failure: Arc::clone(&failure),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        let transport = Self {
            http_client,
            sse_url,
            headers,
            endpoint: endpoint_rx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            failure,
            cancel,
            request_timeout,
        };

        let endpoint = transport.wait_for_endpoint(ENDPOINT_TIMEOUT).await?;
        tracing::debug!("SSE server {} advertised endpoint {}", transport.sse_url, endpoint);
        Ok(transport)
    }

    /// The URL outbound messages are posted to, once known.
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.borrow().clone()
    }

    async fn wait_for_endpoint(&self, timeout: Duration) -> Result<Url> {
        let mut rx = self.endpoint.clone();
        let wait = async move {
            loop {
                if let Some(url) = rx.borrow_and_update().clone() {
                    return Some(url);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Err(McpHostError::Transport(format!(
                "event stream {} closed before advertising an endpoint: {}",
                self.sse_url,
                self.failure()
                    .unwrap_or_else(|| "stream ended".to_string())
            ))
            .into()),
            Err(_) => Err(McpHostError::Transport(format!(
                "no endpoint event from {} within {:?}",
                self.sse_url, timeout
            ))
            .into()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    /// POST the message to the advertised endpoint.
    ///
    /// The response body is ignored; the reply arrives on the event stream.
    async fn send(&self, message: String) -> Result<()> {
        if let Some(reason) = self.failure() {
            return Err(
                McpHostError::Transport(format!("event stream is down: {}", reason)).into(),
            );
        }
        if self.cancel.is_cancelled() {
            return Err(McpHostError::Transport("sse transport is closed".to_string()).into());
        }

        let endpoint = self
            .endpoint()
            .ok_or_else(|| McpHostError::Transport("no message endpoint yet".to_string()))?;

        let mut req = self
            .http_client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHostError::Transport(format!("POST {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpHostError::Transport(format!(
                "POST {} returned HTTP {}",
                endpoint, status
            ))
            .into());
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background task owning the event stream and its reconnects.
///
/// Holds the only inbound sender, so the transport's `receive` stream ends
/// exactly when this task returns.
struct EventStreamTask {
    client: reqwest::Client,
    sse_url: Url,
    headers: HashMap<String, String>,
    backoff: Backoff,
    endpoint_tx: watch::Sender<Option<Url>>,
    response_tx: mpsc::UnboundedSender<String>,
    failure: FailureSlot,
    cancel: CancellationToken,
}

impl EventStreamTask {
    async fn run(self) {
        let mut last_event_id: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            let (events, reason) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                outcome = self.stream_once(&mut last_event_id) => outcome,
            };

            if self.cancel.is_cancelled() || self.response_tx.is_closed() {
                return;
            }

            if events > 0 {
                attempt = 0;
            }

            if !self.backoff.allows(attempt) {
                tracing::error!(
                    "Giving up on event stream {} after {} reconnect attempt(s): {}",
                    self.sse_url,
                    attempt,
                    reason
                );
                if let Ok(mut slot) = self.failure.lock() {
                    *slot = Some(reason);
                }
                return;
            }

            attempt += 1;
            let delay = self.backoff.delay_for_attempt(attempt);
            tracing::warn!(
                "Event stream {} dropped ({}); reconnecting in {:?} (attempt {}/{})",
                self.sse_url,
                reason,
                delay,
                attempt,
                self.backoff.max_retries
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Open the stream once and pump it until it ends.
    ///
    /// Returns the number of events seen and why the stream stopped.
    async fn stream_once(&self, last_event_id: &mut Option<String>) -> (usize, String) {
        let mut req = self
            .client
            .get(self.sse_url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(id) = last_event_id.as_deref() {
            req = req.header("Last-Event-ID", id);
        }

        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => return (0, format!("GET {} failed: {}", self.sse_url, e)),
        };

        let status = response.status();
        if !status.is_success() {
            return (0, format!("GET {} returned HTTP {}", self.sse_url, status));
        }

        let end = parse_sse_stream(response.bytes_stream(), |event| {
            if let Some(id) = &event.id {
                *last_event_id = Some(id.clone());
            }
            self.dispatch(event);
        })
        .await;

        let reason = end
            .error
            .unwrap_or_else(|| "event stream ended".to_string());
        (end.events, reason)
    }

    fn dispatch(&self, event: SseEvent) {
        match event.event.as_deref() {
            Some(name) if name.eq_ignore_ascii_case("ping") => {}
            Some("endpoint") => match self.sse_url.join(event.data.trim()) {
                Ok(url) => {
                    self.endpoint_tx.send_replace(Some(url));
                }
                Err(e) => {
                    tracing::warn!("Ignoring unparsable endpoint `{}`: {}", event.data, e);
                }
            },
            None | Some("message") => {
                if event.data.is_empty() || event.data.eq_ignore_ascii_case("[ping]") {
                    return;
                }
                let _ = self.response_tx.send(event.data);
            }
            Some(other) => {
                tracing::debug!("Ignoring SSE event `{}` from {}", other, self.sse_url);
            }
        }
    }
}

/// Parse an SSE byte stream, calling `on_event` for every complete event.
///
/// Line endings are normalized (`\r` is dropped) and events are separated by
/// blank lines. Blocks that only contain comments produce no event. A
/// trailing block without a closing blank line is still delivered.
pub async fn parse_sse_stream<S, F>(byte_stream: S, mut on_event: F) -> SseStreamEnd
where
    S: Stream<Item = reqwest::Result<Bytes>>,
    F: FnMut(SseEvent),
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut end = SseStreamEnd::default();

    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                end.error = Some(format!("event stream read failed: {}", e));
                return end;
            }
        };

        buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block[..pos])) {
                end.events += 1;
                on_event(event);
            }
        }
    }

    if !buffer.is_empty() {
        if let Some(event) = parse_event_block(&String::from_utf8_lossy(&buffer)) {
            end.events += 1;
            on_event(event);
        }
    }

    end
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut saw_field = false;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => {
                data_lines.push(value);
                saw_field = true;
            }
            "event" => {
                event.event = Some(value.to_string());
                saw_field = true;
            }
            "id" => {
                event.id = Some(value.to_string());
                saw_field = true;
            }
            // `retry:` and unknown fields are ignored.
            _ => {}
        }
    }

    if !saw_field {
        return None;
    }

    event.data = data_lines.join("\n");
    Some(event)
}
