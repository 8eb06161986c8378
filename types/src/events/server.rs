mod error;
mod resources;

pub use error::ErrorDetails;
pub use resources::*;
use crate::ContentPart;

/// Fields shared by every server event.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
}

/// `error`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub event_id: String,
    pub error: ErrorDetails,
}

/// `session.created` and `session.updated`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionEvent {
    #[serde(default)]
    pub event_id: String,
    pub session: SessionResource,
}

/// `conversation.created`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationCreatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub conversation: ConversationResource,
}

/// `input_audio_buffer.committed`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommittedEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub previous_item_id: Option<String>,
    /// The user message item that will be created
    pub item_id: String,
}

/// `input_audio_buffer.speech_started`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpeechStartedEvent {
    #[serde(default)]
    pub event_id: String,
    /// Milliseconds into the input buffer where speech was detected
    pub audio_start_ms: i32,
    pub item_id: String,
}

/// `input_audio_buffer.speech_stopped`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpeechStoppedEvent {
    #[serde(default)]
    pub event_id: String,
    pub audio_end_ms: i32,
    pub item_id: String,
}

/// `conversation.item.created`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreatedEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub previous_item_id: Option<String>,
    pub item: ItemResource,
}

/// `conversation.item.input_audio_transcription.delta`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: i32,
    pub delta: String,
}

/// `conversation.item.input_audio_transcription.completed`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionCompletedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: i32,
    pub transcript: String,
}

/// `conversation.item.input_audio_transcription.failed`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionFailedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: i32,
    pub error: ErrorDetails,
}

/// `conversation.item.truncated`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemTruncatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: i32,
    pub audio_end_ms: i32,
}

/// `conversation.item.deleted`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemDeletedEvent {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
}

/// `response.created` and `response.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseEvent {
    #[serde(default)]
    pub event_id: String,
    pub response: ResponseResource,
}

/// `response.output_item.added` and `response.output_item.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseOutputItemEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub output_index: i32,
    pub item: ItemResource,
}

/// Locates a content part inside a response.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponsePartRef {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: i32,
    pub content_index: i32,
}

/// `response.content_part.added` and `response.content_part.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseContentPartEvent {
    #[serde(flatten)]
    pub part_ref: ResponsePartRef,
    pub part: ContentPart,
}

/// `response.text.delta`, `response.audio_transcript.delta` and
/// `response.audio.delta` (where `delta` is base64 PCM16).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseDeltaEvent {
    #[serde(flatten)]
    pub part: ResponsePartRef,
    pub delta: String,
}

/// `response.text.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseTextDoneEvent {
    #[serde(flatten)]
    pub part: ResponsePartRef,
    pub text: String,
}

/// `response.audio_transcript.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseAudioTranscriptDoneEvent {
    #[serde(flatten)]
    pub part: ResponsePartRef,
    pub transcript: String,
}

/// `response.function_call_arguments.delta`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallArgumentsDeltaEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: i32,
    pub call_id: String,
    pub delta: String,
}

/// `response.function_call_arguments.done`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallArgumentsDoneEvent {
    #[serde(default)]
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: i32,
    pub call_id: String,
    pub arguments: String,
}

/// `rate_limits.updated`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitsUpdatedEvent {
    #[serde(default)]
    pub event_id: String,
    pub rate_limits: Vec<RateLimitInformation>,
}
