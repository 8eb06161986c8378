//! Commands to the remote agent, layered over a [`RealtimeTransport`].

use teddy_realtime_utils::audio;

use crate::conversation::{Conversation, ConversationEvent};
use crate::error::{ConfigError, TransportError};
use crate::transport::{RealtimeTransport, ServerRx};
use crate::types::audio::samples_to_ms;
use crate::types::events::client::{
    ConversationItemCreateEvent, ConversationItemDeleteEvent, ConversationItemTruncateEvent,
    InputAudioBufferAppendEvent, InputAudioBufferCommitEvent, ResponseCancelEvent, ResponseCreateEvent,
    SessionUpdateEvent,
};
use crate::types::{
    ClientEvent, ConversationItem, FunctionCallOutputItem, Item, ItemKind, ItemRole, ItemStatus, MessageItem,
    ServerEvent, Session,
};

pub struct RemoteAgent {
    transport: Box<dyn RealtimeTransport>,
    session: Session,
    conversation: Conversation,
    /// Samples appended since the last commit.
    input_pending: usize,
    /// Raw client events sent, waiting to be logged.
    outbound: Vec<serde_json::Value>,
}

impl RemoteAgent {
    pub fn new(transport: Box<dyn RealtimeTransport>, session: Session) -> Self {
        Self {
            transport,
            session,
            conversation: Conversation::new(),
            input_pending: 0,
            outbound: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Opens the transport and pushes the current session configuration.
    pub async fn connect(&mut self) -> Result<ServerRx, TransportError> {
        let server_rx = self.transport.connect().await?;
        self.send(ClientEvent::SessionUpdate(SessionUpdateEvent::new(self.session.clone())))
            .await?;
        Ok(server_rx)
    }

    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.conversation.clear();
        self.input_pending = 0;
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        match serde_json::to_value(&event) {
            Ok(raw) => self.outbound.push(raw),
            Err(e) => tracing::error!("failed to serialize {} for the log: {}", event.event_type(), e),
        }
        self.transport.send(event).await
    }

    /// Client events sent since the last call, in order.
    pub fn drain_outbound(&mut self) -> Vec<serde_json::Value> {
        std::mem::take(&mut self.outbound)
    }

    /// Applies `update` to the session config; sent only while connected.
    pub async fn update_session<F>(&mut self, update: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut Session),
    {
        update(&mut self.session);
        if self.is_connected() {
            self.send(ClientEvent::SessionUpdate(SessionUpdateEvent::new(self.session.clone())))
                .await?;
        }
        Ok(())
    }

    pub async fn append_input_audio(&mut self, samples: &[i16]) -> Result<(), TransportError> {
        if samples.is_empty() {
            return Ok(());
        }
        self.send(ClientEvent::InputAudioBufferAppend(InputAudioBufferAppendEvent::new(audio::encode(
            samples,
        ))))
        .await?;
        self.conversation.append_input_audio(samples);
        self.input_pending += samples.len();
        Ok(())
    }

    /// Requests a response. In manual turns, pending input audio is committed first.
    pub async fn create_response(&mut self) -> Result<(), TransportError> {
        if self.session.turn_detection().is_none() && self.input_pending > 0 {
            self.send(ClientEvent::InputAudioBufferCommit(InputAudioBufferCommitEvent::new()))
                .await?;
            self.conversation.queue_input_audio();
            self.input_pending = 0;
        }
        self.send(ClientEvent::ResponseCreate(ResponseCreateEvent::new())).await
    }

    /// Cancels the in-flight response and truncates the assistant item at the
    /// number of samples actually heard.
    pub async fn cancel_response(&mut self, track_id: &str, sample_offset: usize) -> Result<(), TransportError> {
        let item = self
            .conversation
            .get(track_id)
            .ok_or_else(|| TransportError::UnknownItem(track_id.to_string()))?;
        if !item.is_assistant() {
            return Err(TransportError::NotAssistant(track_id.to_string()));
        }
        self.send(ClientEvent::ResponseCancel(ResponseCancelEvent::new())).await?;
        let audio_end_ms = samples_to_ms(sample_offset);
        self.send(ClientEvent::ConversationItemTruncate(ConversationItemTruncateEvent::new(
            track_id,
            0,
            audio_end_ms,
        )))
        .await
    }

    /// Removes the item locally and asks the server to delete it.
    pub async fn delete_item(&mut self, id: &str) -> Result<(), TransportError> {
        self.conversation.remove(id);
        self.send(ClientEvent::ConversationItemDelete(ConversationItemDeleteEvent::new(id)))
            .await
    }

    /// Adds a user text message under a locally assigned id and requests a response.
    pub async fn send_user_message(&mut self, text: &str) -> Result<ConversationEvent, TransportError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let message = MessageItem::builder().with_id(&id).with_input_text(text).build();
        self.send(ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(Item::Message(
            message,
        ))))
        .await?;

        let mut item = ConversationItem::new(id, ItemKind::Message, ItemRole::User);
        item.status = ItemStatus::Completed;
        item.formatted.text = text.to_string();
        let event = self.conversation.insert_local(item);

        self.create_response().await?;
        Ok(event)
    }

    /// Returns a settled tool result and asks the model to continue.
    pub async fn send_tool_output(&mut self, call_id: &str, output: &serde_json::Value) -> Result<(), TransportError> {
        let output = FunctionCallOutputItem::new(call_id, &output.to_string());
        self.send(ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(
            Item::FunctionCallOutput(output),
        )))
        .await?;
        self.send(ClientEvent::ResponseCreate(ResponseCreateEvent::new())).await
    }

    pub fn process(&mut self, event: &ServerEvent) -> Vec<ConversationEvent> {
        self.conversation.process(event)
    }
}
