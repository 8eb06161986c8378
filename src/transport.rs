//! Duplex channel to the remote conversational agent.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ConfigError, TransportError};
use crate::types::{ClientEvent, ServerEvent};

/// What the transport delivers, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    /// A server message, raw JSON alongside its parsed form.
    Event {
        raw: serde_json::Value,
        event: ServerEvent,
    },
    /// The remote side closed the connection.
    Closed { reason: Option<String> },
    /// Unrecoverable failure; no further messages follow.
    Failed(TransportError),
}

pub type ServerRx = mpsc::Receiver<Inbound>;

#[async_trait]
pub trait RealtimeTransport: Send {
    /// Checks endpoint and credential before any connection attempt.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn connect(&mut self) -> Result<ServerRx, TransportError>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;
}
