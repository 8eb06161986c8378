use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ConfigError, TransportError};
use crate::transport::{Inbound, RealtimeTransport, ServerRx};
use crate::types;

pub mod config;
pub mod consts;
mod utils;

pub use config::{Config, ConfigBuilder};

pub type ClientTx = tokio::sync::mpsc::Sender<types::ClientEvent>;
type ServerTx = tokio::sync::mpsc::Sender<Inbound>;

struct Connection {
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

/// WebSocket client for the Realtime API.
pub struct Client {
    capacity: usize,
    config: Config,
    c_tx: Option<ClientTx>,
    connection: Option<Connection>,
    connected: Arc<AtomicBool>,
}

impl Client {
    pub fn new(capacity: usize, config: Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            connection: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Parses one text frame. Unknown or unparseable event bodies are passed on
/// as [`types::ServerEvent::Unknown`] so they still reach the event log.
fn parse_text(text: &str) -> Result<Inbound, TransportError> {
    let raw = serde_json::from_str::<serde_json::Value>(text)
        .map_err(|e| TransportError::Malformed(e.to_string()))?;
    let event_type = raw.get("type").and_then(|v| v.as_str());
    let event_id = raw.get("event_id").and_then(|v| v.as_str());
    tracing::debug!(
        "received message: {}, id={}",
        event_type.unwrap_or("unknown"),
        event_id.unwrap_or("unknown")
    );
    let event = match serde_json::from_value::<types::ServerEvent>(raw.clone()) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("failed to deserialize event: {}, type=> {:?}", e, event_type);
            types::ServerEvent::Unknown
        }
    };
    Ok(Inbound::Event { raw, event })
}

async fn forward(s_tx: &ServerTx, inbound: Inbound) -> bool {
    if let Err(e) = s_tx.send(inbound).await {
        tracing::error!("failed to send event: {}", e);
        return false;
    }
    true
}

#[async_trait]
impl RealtimeTransport for Client {
    fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()
    }

    async fn connect(&mut self) -> Result<ServerRx, TransportError> {
        if self.c_tx.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<types::ClientEvent>(self.capacity);
        let (s_tx, s_rx) = tokio::sync::mpsc::channel(self.capacity);

        let send_handle = tokio::spawn(async move {
            while let Some(event) = c_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                    }
                }
            }
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("close frame not sent: {}", e);
            }
        });

        let connected = self.connected.clone();
        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        forward(&s_tx, Inbound::Failed(e.into())).await;
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match parse_text(&text) {
                        Ok(inbound) => {
                            if !forward(&s_tx, inbound).await {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("{}", e);
                            forward(&s_tx, Inbound::Failed(e)).await;
                            break;
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        let reason = reason.map(|frame| frame.reason.to_string());
                        forward(&s_tx, Inbound::Closed { reason }).await;
                        break;
                    }
                    _ => {}
                }
            }
            connected.store(false, Ordering::Release);
        });

        self.c_tx = Some(c_tx);
        self.connection = Some(Connection { send_handle, recv_handle });
        self.connected.store(true, Ordering::Release);
        tracing::info!("connected to {}", self.config.relay_url().unwrap_or(self.config.base_url()));
        Ok(s_rx)
    }

    async fn disconnect(&mut self) {
        // Dropping the sender lets the writer flush and send a close frame.
        self.c_tx = None;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.send_handle.await {
                tracing::error!("writer task failed: {}", e);
            }
            connection.recv_handle.abort();
        }
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.c_tx.is_some() && self.connected.load(Ordering::Acquire)
    }

    async fn send(&mut self, event: types::ClientEvent) -> Result<(), TransportError> {
        match self.c_tx {
            Some(ref tx) if self.connected.load(Ordering::Acquire) => tx
                .send(event)
                .await
                .map_err(|_| TransportError::Closed(Some("writer stopped".to_string()))),
            _ => Err(TransportError::NotConnected),
        }
    }
}

/// Client configured from the environment.
pub fn from_env() -> Client {
    Client::new(consts::DEFAULT_CAPACITY, Config::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_events_are_parsed_with_their_raw_form() {
        let text = r#"{"type":"conversation.item.deleted","event_id":"e1","item_id":"item_1"}"#;
        match parse_text(text).unwrap() {
            Inbound::Event { raw, event } => {
                assert_eq!(raw["item_id"], "item_1");
                assert!(matches!(event, types::ServerEvent::ConversationItemDeleted(ref e) if e.item_id == "item_1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn known_type_with_bad_body_is_kept_as_unknown() {
        let text = r#"{"type":"conversation.item.deleted","event_id":"e1"}"#;
        match parse_text(text).unwrap() {
            Inbound::Event { raw, event } => {
                assert_eq!(raw["type"], "conversation.item.deleted");
                assert_eq!(event, types::ServerEvent::Unknown);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(parse_text("{nope"), Err(TransportError::Malformed(_))));
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let mut client = Client::new(8, Config::builder().with_api_key("sk-test").build());
        assert!(!client.is_connected());
        let event = types::ClientEvent::ResponseCreate(types::events::client::ResponseCreateEvent::new());
        assert!(matches!(client.send(event).await, Err(TransportError::NotConnected)));
    }
}
