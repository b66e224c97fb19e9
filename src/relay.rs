//! Relay network collaborator.
//!
//! The engine core depends only on the [`Network`] trait; [`RelayPool`] is
//! the thin WebSocket implementation speaking `REQ`/`EVENT`/`EOSE`/`CLOSE`
//! against every configured relay. Failures here are never retried; the
//! caller owns retry policy.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use url::Url;

use crate::event::{Event, Filter};

/// Failure talking to the relay network.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid relay url: {0}")]
    Url(String),
    #[error("websocket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("proxy connection failed: {0}")]
    Proxy(#[from] tokio_socks::Error),
    #[error("no relay could be reached")]
    NoRelay,
}

/// The event network as seen by the cache: one-shot queries, fire-and-ack
/// publishes, and live subscriptions delivered over a channel.
#[async_trait]
pub trait Network: Send + Sync {
    /// Query every relay and return the merged, id-deduplicated results.
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>, NetworkError>;

    /// Broadcast an event. Succeeds if at least one relay took it.
    async fn publish(&self, event: &Event) -> Result<(), NetworkError>;

    /// Open a live subscription and deliver events on `tx`. Resolves once
    /// the stream has been quiet for the configured window; there is no
    /// explicit cancellation token.
    async fn subscribe(&self, filter: Filter, tx: mpsc::Sender<Event>)
        -> Result<(), NetworkError>;
}

/// WebSocket client over a set of relays, optionally through a SOCKS5 proxy.
pub struct RelayPool {
    relays: Vec<String>,
    tor_socks: Option<String>,
    quiet: Duration,
}

impl RelayPool {
    /// `quiet` bounds how long a subscription or acknowledgment wait may go
    /// without traffic before it is considered finished.
    pub fn new(relays: Vec<String>, tor_socks: Option<String>, quiet: Duration) -> Self {
        Self {
            relays,
            tor_socks,
            quiet,
        }
    }

    /// Issue a `REQ` on one relay and collect events until `EOSE`, close, or
    /// a quiet window with no traffic.
    async fn fetch_from(&self, relay: &str, filter: &Filter) -> Result<Vec<Event>, NetworkError> {
        let mut ws = connect_ws(relay, self.tor_socks.as_deref()).await?;
        let req = json!(["REQ", "fetch", filter]);
        ws.send(Message::Text(req.to_string())).await?;
        let mut events = vec![];
        loop {
            let msg = match tokio::time::timeout(self.quiet, ws.next()).await {
                Ok(Some(msg)) => msg?,
                Ok(None) => break,
                Err(_) => break,
            };
            match msg {
                Message::Text(txt) => match parse_relay_message(&txt) {
                    Some(RelayMessage::Event(ev)) => events.push(ev),
                    Some(RelayMessage::Eose) => break,
                    _ => {}
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = ws
            .send(Message::Text(json!(["CLOSE", "fetch"]).to_string()))
            .await;
        Ok(events)
    }

    /// Send one event and wait for an acknowledgment until the quiet window
    /// lapses.
    async fn publish_to(&self, relay: &str, event: &Event) -> Result<(), NetworkError> {
        let mut ws = connect_ws(relay, self.tor_socks.as_deref()).await?;
        ws.send(Message::Text(json!(["EVENT", event]).to_string()))
            .await?;
        while let Ok(Some(msg)) = tokio::time::timeout(self.quiet, ws.next()).await {
            match msg? {
                Message::Text(txt) => {
                    if matches!(parse_relay_message(&txt), Some(RelayMessage::Ok)) {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Live subscription against one relay. Keeps reading past `EOSE` and
    /// stops once no event has arrived for a quiet window.
    async fn subscribe_to(
        &self,
        relay: &str,
        filter: &Filter,
        tx: mpsc::Sender<Event>,
    ) -> Result<(), NetworkError> {
        let mut ws = connect_ws(relay, self.tor_socks.as_deref()).await?;
        let req = json!(["REQ", "live", filter]);
        ws.send(Message::Text(req.to_string())).await?;
        loop {
            let msg = match tokio::time::timeout(self.quiet, ws.next()).await {
                Ok(Some(msg)) => msg?,
                Ok(None) => break,
                Err(_) => break,
            };
            match msg {
                Message::Text(txt) => {
                    if let Some(RelayMessage::Event(ev)) = parse_relay_message(&txt) {
                        if tx.send(ev).await.is_err() {
                            break; // receiver gone, stop reading
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = ws
            .send(Message::Text(json!(["CLOSE", "live"]).to_string()))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Network for RelayPool {
    async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>, NetworkError> {
        if self.relays.is_empty() {
            return Err(NetworkError::NoRelay);
        }
        let attempts = join_all(self.relays.iter().map(|r| self.fetch_from(r, filter))).await;
        let mut seen = HashSet::new();
        let mut events = vec![];
        let mut reached = false;
        let mut last_err = None;
        for (relay, res) in self.relays.iter().zip(attempts) {
            match res {
                Ok(list) => {
                    reached = true;
                    for ev in list {
                        if ev.id.is_empty() || seen.insert(ev.id.clone()) {
                            events.push(ev);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(relay = %relay, error = %e, "relay fetch failed");
                    last_err = Some(e);
                }
            }
        }
        if reached {
            Ok(events)
        } else {
            Err(last_err.unwrap_or(NetworkError::NoRelay))
        }
    }

    async fn publish(&self, event: &Event) -> Result<(), NetworkError> {
        if self.relays.is_empty() {
            return Err(NetworkError::NoRelay);
        }
        let attempts = join_all(self.relays.iter().map(|r| self.publish_to(r, event))).await;
        let mut sent = 0;
        let mut last_err = None;
        for (relay, res) in self.relays.iter().zip(attempts) {
            match res {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(relay = %relay, error = %e, "relay publish failed");
                    last_err = Some(e);
                }
            }
        }
        if sent > 0 {
            Ok(())
        } else {
            Err(last_err.unwrap_or(NetworkError::NoRelay))
        }
    }

    async fn subscribe(
        &self,
        filter: Filter,
        tx: mpsc::Sender<Event>,
    ) -> Result<(), NetworkError> {
        if self.relays.is_empty() {
            return Err(NetworkError::NoRelay);
        }
        let attempts = join_all(
            self.relays
                .iter()
                .map(|r| self.subscribe_to(r, &filter, tx.clone())),
        )
        .await;
        let mut reached = false;
        let mut last_err = None;
        for (relay, res) in self.relays.iter().zip(attempts) {
            match res {
                Ok(()) => reached = true,
                Err(e) => {
                    tracing::warn!(relay = %relay, error = %e, "relay subscription failed");
                    last_err = Some(e);
                }
            }
        }
        if reached {
            Ok(())
        } else {
            Err(last_err.unwrap_or(NetworkError::NoRelay))
        }
    }
}

/// The subset of relay-to-client messages this crate reacts to.
enum RelayMessage {
    Event(Event),
    Eose,
    Ok,
}

/// Decode one relay frame; anything unrecognized is `None` and ignored.
fn parse_relay_message(txt: &str) -> Option<RelayMessage> {
    let val = serde_json::from_str::<Value>(txt).ok()?;
    let arr = val.as_array()?;
    match arr.first().and_then(|v| v.as_str()) {
        Some("EVENT") if arr.len() >= 3 => {
            let ev = serde_json::from_value::<Event>(arr[2].clone()).ok()?;
            Some(RelayMessage::Event(ev))
        }
        Some("EOSE") => Some(RelayMessage::Eose),
        Some("OK") => Some(RelayMessage::Ok),
        _ => None,
    }
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(
    relay: &str,
    tor_socks: Option<&str>,
) -> Result<WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>, NetworkError> {
    let url = Url::parse(relay).map_err(|_| NetworkError::Url(relay.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| NetworkError::Url(relay.to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| NetworkError::Url(relay.to_string()))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
