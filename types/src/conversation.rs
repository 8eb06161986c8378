//! Locally reconciled view of the conversation.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments, accumulated from deltas
    pub arguments: String,
}

/// Merged payload of an item. Audio is held at 24 kHz mono PCM16 and is not
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FormattedContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(skip)]
    pub audio: Option<Arc<[i16]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl FormattedContent {
    pub fn audio_len(&self) -> usize {
        self.audio.as_ref().map_or(0, |audio| audio.len())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub role: ItemRole,
    pub status: ItemStatus,
    #[serde(default)]
    pub formatted: FormattedContent,
}

impl ConversationItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, role: ItemRole) -> Self {
        Self {
            id: id.into(),
            kind,
            role,
            status: ItemStatus::InProgress,
            formatted: FormattedContent::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }

    pub fn is_assistant(&self) -> bool {
        self.role == ItemRole::Assistant
    }
}

/// Incremental change carried by a `conversation.updated` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDelta {
    pub audio: Option<Vec<i16>>,
    pub text: Option<String>,
    pub transcript: Option<String>,
    pub arguments: Option<String>,
}

impl ItemDelta {
    pub fn audio(samples: Vec<i16>) -> Self {
        Self {
            audio: Some(samples),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn transcript(transcript: impl Into<String>) -> Self {
        Self {
            transcript: Some(transcript.into()),
            ..Default::default()
        }
    }

    pub fn arguments(arguments: impl Into<String>) -> Self {
        Self {
            arguments: Some(arguments.into()),
            ..Default::default()
        }
    }
}

/// A captured still image after upload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageArtifact {
    pub url: String,
    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: i64,
}
