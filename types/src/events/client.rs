use crate::audio::Base64EncodedAudioBytes;
use crate::content::items::Item;
use crate::session::Session;

/// `session.update`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    session: Session,
}

impl SessionUpdateEvent {
    pub fn new(session: Session) -> Self {
        Self { event_id: None, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// `input_audio_buffer.append`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferAppendEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    audio: Base64EncodedAudioBytes,
}

impl InputAudioBufferAppendEvent {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self { event_id: None, audio }
    }

    pub fn audio(&self) -> &str {
        &self.audio
    }
}

/// `input_audio_buffer.commit`, closes the user turn in manual mode.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommitEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferCommitEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `input_audio_buffer.clear`
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferClearEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferClearEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `conversation.item.create`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_item_id: Option<String>,
    item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn with_previous_item_id(mut self, previous_item_id: &str) -> Self {
        self.previous_item_id = Some(previous_item_id.to_string());
        self
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `conversation.item.truncate`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemTruncateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    item_id: String,
    content_index: i32,
    /// Inclusive duration up to which audio is kept, in milliseconds
    audio_end_ms: i32,
}

impl ConversationItemTruncateEvent {
    pub fn new(item_id: &str, content_index: i32, audio_end_ms: i32) -> Self {
        Self {
            event_id: None,
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn audio_end_ms(&self) -> i32 {
        self.audio_end_ms
    }
}

/// `conversation.item.delete`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemDeleteEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    item_id: String,
}

impl ConversationItemDeleteEvent {
    pub fn new(item_id: &str) -> Self {
        Self {
            event_id: None,
            item_id: item_id.to_string(),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `response.create`
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `response.cancel`
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCancelEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl ResponseCancelEvent {
    pub fn new() -> Self {
        Self::default()
    }
}
