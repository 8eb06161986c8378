//! Merges server events into an ordered list of conversation items.

use std::collections::HashMap;
use std::sync::Arc;

use teddy_realtime_utils::audio;

use crate::types::audio::ms_to_samples;
use crate::types::events::server::{ErrorDetails, ItemResource, ItemType, ResourceStatus};
use crate::types::{ConversationItem, ItemDelta, ItemKind, ItemRole, ItemStatus, MessageRole, ServerEvent, ToolCall};

/// Input audio kept behind the last finished utterance, covering the prefix
/// padding of the next one.
const RETAINED_INPUT_MS: i32 = 1000;

/// What a server event changed, as seen by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Updated {
        item: ConversationItem,
        delta: Option<ItemDelta>,
    },
    /// The item will receive no further deltas. Function calls are dispatched on this.
    Completed { item: ConversationItem },
    /// The user started speaking over the assistant.
    Interrupted,
    Deleted { item_id: String },
    Error(ErrorDetails),
}

struct Entry {
    item: ConversationItem,
    audio: Vec<i16>,
}

impl Entry {
    fn snapshot_audio(&mut self) {
        self.item.formatted.audio = if self.audio.is_empty() {
            None
        } else {
            Some(Arc::from(self.audio.as_slice()))
        };
    }
}

#[derive(Default)]
pub struct Conversation {
    entries: Vec<Entry>,
    /// Input audio not yet sliced into speech. Server offsets count from the
    /// first sample ever appended, `input_base` samples before this buffer.
    input_audio: Vec<i16>,
    input_base: usize,
    queued_speech: HashMap<String, i32>,
    queued_speech_audio: HashMap<String, Vec<i16>>,
    queued_transcripts: HashMap<String, String>,
    queued_input_audio: Option<Vec<i16>>,
}

fn role_of(resource: &ItemResource) -> ItemRole {
    match resource.kind {
        ItemType::FunctionCall | ItemType::FunctionCallOutput => ItemRole::Tool,
        ItemType::Message => match resource.role {
            Some(MessageRole::User) => ItemRole::User,
            Some(MessageRole::System) => ItemRole::System,
            Some(MessageRole::Assistant) | None => ItemRole::Assistant,
        },
    }
}

fn kind_of(kind: ItemType) -> ItemKind {
    match kind {
        ItemType::Message => ItemKind::Message,
        ItemType::FunctionCall => ItemKind::FunctionCall,
        ItemType::FunctionCallOutput => ItemKind::FunctionCallOutput,
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<ConversationItem> {
        self.entries.iter().map(|entry| entry.item.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.entries.iter().find(|entry| entry.item.id == id).map(|entry| &entry.item)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.item.id == id)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Tracks audio sent with `input_audio_buffer.append`.
    pub fn append_input_audio(&mut self, samples: &[i16]) {
        self.input_audio.extend_from_slice(samples);
    }

    /// Hands the committed input buffer to the next user item (manual turns).
    pub fn queue_input_audio(&mut self) {
        let audio = std::mem::take(&mut self.input_audio);
        self.input_base += audio.len();
        if !audio.is_empty() {
            self.queued_input_audio = Some(audio);
        }
    }

    /// Inserts a locally submitted item. The server echo for the same id is ignored.
    pub fn insert_local(&mut self, item: ConversationItem) -> ConversationEvent {
        match self.position(&item.id) {
            Some(index) => self.entries[index].item = item.clone(),
            None => self.entries.push(Entry {
                item: item.clone(),
                audio: Vec::new(),
            }),
        }
        ConversationEvent::Updated { item, delta: None }
    }

    /// Removes the item locally, ahead of the server's confirmation.
    pub fn remove(&mut self, id: &str) -> Option<ConversationItem> {
        let index = self.position(id)?;
        Some(self.entries.remove(index).item)
    }

    fn entry_or_assistant(&mut self, id: &str) -> &mut Entry {
        let index = match self.position(id) {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    item: ConversationItem::new(id, ItemKind::Message, ItemRole::Assistant),
                    audio: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    fn updated(entry: &Entry, delta: ItemDelta) -> Vec<ConversationEvent> {
        vec![ConversationEvent::Updated {
            item: entry.item.clone(),
            delta: Some(delta),
        }]
    }

    pub fn process(&mut self, event: &ServerEvent) -> Vec<ConversationEvent> {
        match event {
            ServerEvent::Error(error) => {
                tracing::error!("server error: {}", error.error);
                vec![ConversationEvent::Error(error.error.clone())]
            }
            ServerEvent::InputAudioBufferCleared(_) => {
                self.input_base += self.input_audio.len();
                self.input_audio.clear();
                vec![]
            }
            ServerEvent::InputAudioBufferSpeechStarted(started) => {
                self.queued_speech.insert(started.item_id.clone(), started.audio_start_ms);
                vec![ConversationEvent::Interrupted]
            }
            ServerEvent::InputAudioBufferSpeechStopped(stopped) => {
                let Some(start_ms) = self.queued_speech.remove(&stopped.item_id) else {
                    tracing::warn!("speech stopped for unknown item {}", stopped.item_id);
                    return vec![];
                };
                let buffered = |ms: i32| ms_to_samples(ms).saturating_sub(self.input_base);
                let start = buffered(start_ms).min(self.input_audio.len());
                let end = buffered(stopped.audio_end_ms).clamp(start, self.input_audio.len());
                self.queued_speech_audio
                    .insert(stopped.item_id.clone(), self.input_audio[start..end].to_vec());
                if self.queued_speech.is_empty() {
                    let spent = end.saturating_sub(ms_to_samples(RETAINED_INPUT_MS));
                    self.input_audio.drain(..spent);
                    self.input_base += spent;
                }
                vec![]
            }
            ServerEvent::ConversationItemCreated(created) => self.item_created(&created.item),
            ServerEvent::InputAudioTranscriptionDelta(delta) => match self.position(&delta.item_id) {
                Some(index) => {
                    let entry = &mut self.entries[index];
                    entry.item.formatted.transcript.push_str(&delta.delta);
                    Self::updated(entry, ItemDelta::transcript(delta.delta.clone()))
                }
                None => {
                    self.queued_transcripts
                        .entry(delta.item_id.clone())
                        .or_default()
                        .push_str(&delta.delta);
                    vec![]
                }
            },
            ServerEvent::InputAudioTranscriptionCompleted(completed) => {
                let transcript = if completed.transcript.is_empty() {
                    " ".to_string()
                } else {
                    completed.transcript.clone()
                };
                match self.position(&completed.item_id) {
                    Some(index) => {
                        let entry = &mut self.entries[index];
                        entry.item.formatted.transcript = transcript.clone();
                        Self::updated(entry, ItemDelta::transcript(transcript))
                    }
                    None => {
                        self.queued_transcripts.insert(completed.item_id.clone(), transcript);
                        vec![]
                    }
                }
            }
            ServerEvent::InputAudioTranscriptionFailed(failed) => {
                tracing::warn!("transcription failed for {}: {}", failed.item_id, failed.error);
                vec![]
            }
            ServerEvent::ConversationItemTruncated(truncated) => {
                let Some(index) = self.position(&truncated.item_id) else {
                    tracing::warn!("truncated unknown item {}", truncated.item_id);
                    return vec![];
                };
                let entry = &mut self.entries[index];
                let end = ms_to_samples(truncated.audio_end_ms).min(entry.audio.len());
                entry.audio.truncate(end);
                entry.item.formatted.transcript.clear();
                entry.snapshot_audio();
                vec![ConversationEvent::Updated {
                    item: entry.item.clone(),
                    delta: None,
                }]
            }
            ServerEvent::ConversationItemDeleted(deleted) => {
                self.remove(&deleted.item_id);
                vec![ConversationEvent::Deleted {
                    item_id: deleted.item_id.clone(),
                }]
            }
            ServerEvent::ResponseOutputItemDone(done) => self.item_done(&done.item),
            ServerEvent::ResponseAudioTranscriptDelta(delta) => {
                let entry = self.entry_or_assistant(&delta.part.item_id);
                entry.item.formatted.transcript.push_str(&delta.delta);
                Self::updated(entry, ItemDelta::transcript(delta.delta.clone()))
            }
            ServerEvent::ResponseAudioDelta(delta) => {
                let samples = audio::decode(&delta.delta);
                let entry = self.entry_or_assistant(&delta.part.item_id);
                entry.audio.extend_from_slice(&samples);
                Self::updated(entry, ItemDelta::audio(samples))
            }
            ServerEvent::ResponseTextDelta(delta) => {
                let entry = self.entry_or_assistant(&delta.part.item_id);
                entry.item.formatted.text.push_str(&delta.delta);
                Self::updated(entry, ItemDelta::text(delta.delta.clone()))
            }
            ServerEvent::ResponseFunctionCallArgumentsDelta(delta) => {
                let Some(index) = self.position(&delta.item_id) else {
                    tracing::warn!("arguments for unknown function call {}", delta.item_id);
                    return vec![];
                };
                let entry = &mut self.entries[index];
                let tool = entry.item.formatted.tool.get_or_insert_with(|| ToolCall {
                    call_id: delta.call_id.clone(),
                    name: String::new(),
                    arguments: String::new(),
                });
                tool.arguments.push_str(&delta.delta);
                Self::updated(entry, ItemDelta::arguments(delta.delta.clone()))
            }
            _ => vec![],
        }
    }

    fn item_created(&mut self, resource: &ItemResource) -> Vec<ConversationEvent> {
        if self.position(&resource.id).is_some() {
            return vec![];
        }
        let mut item = ConversationItem::new(&resource.id, kind_of(resource.kind), role_of(resource));
        let mut audio = self.queued_speech_audio.remove(&resource.id).unwrap_or_default();
        match resource.kind {
            ItemType::Message => {
                for content in resource.content.iter().flatten() {
                    if let Some(text) = &content.text {
                        item.formatted.text.push_str(text);
                    }
                    if let Some(transcript) = &content.transcript {
                        item.formatted.transcript.push_str(transcript);
                    }
                }
                if item.role == ItemRole::User {
                    item.status = ItemStatus::Completed;
                    if let Some(queued) = self.queued_input_audio.take() {
                        audio = queued;
                    }
                }
            }
            ItemType::FunctionCall => {
                item.formatted.tool = Some(ToolCall {
                    call_id: resource.call_id.clone().unwrap_or_default(),
                    name: resource.name.clone().unwrap_or_default(),
                    arguments: resource.arguments.clone().unwrap_or_default(),
                });
            }
            ItemType::FunctionCallOutput => {
                item.status = ItemStatus::Completed;
                item.formatted.output = resource.output.clone();
            }
        }
        if let Some(transcript) = self.queued_transcripts.remove(&resource.id) {
            item.formatted.transcript = transcript;
        }
        let mut entry = Entry { item, audio };
        entry.snapshot_audio();
        let mut events = vec![ConversationEvent::Updated {
            item: entry.item.clone(),
            delta: None,
        }];
        if entry.item.is_completed() {
            events.push(ConversationEvent::Completed {
                item: entry.item.clone(),
            });
        }
        self.entries.push(entry);
        events
    }

    fn item_done(&mut self, resource: &ItemResource) -> Vec<ConversationEvent> {
        let Some(index) = self.position(&resource.id) else {
            tracing::warn!("output item done for unknown item {}", resource.id);
            return vec![];
        };
        let entry = &mut self.entries[index];
        if resource.kind == ItemType::FunctionCall {
            let tool = entry.item.formatted.tool.get_or_insert_with(|| ToolCall {
                call_id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(call_id) = &resource.call_id {
                tool.call_id = call_id.clone();
            }
            if let Some(name) = &resource.name {
                tool.name = name.clone();
            }
            if let Some(arguments) = &resource.arguments {
                tool.arguments = arguments.clone();
            }
        }
        let server_completed = resource.status == Some(ResourceStatus::Completed);
        entry.item.status = ItemStatus::Completed;
        entry.snapshot_audio();
        let mut events = vec![ConversationEvent::Updated {
            item: entry.item.clone(),
            delta: None,
        }];
        if server_completed {
            events.push(ConversationEvent::Completed {
                item: entry.item.clone(),
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    fn assistant_created(id: &str) -> ServerEvent {
        event(json!({
            "type": "conversation.item.created",
            "event_id": "e",
            "item": {"id": id, "type": "message", "role": "assistant", "status": "in_progress", "content": []}
        }))
    }

    fn transcript_delta(id: &str, delta: &str) -> ServerEvent {
        event(json!({
            "type": "response.audio_transcript.delta",
            "response_id": "r", "item_id": id, "output_index": 0, "content_index": 0,
            "delta": delta
        }))
    }

    fn audio_delta(id: &str, samples: &[i16]) -> ServerEvent {
        event(json!({
            "type": "response.audio.delta",
            "response_id": "r", "item_id": id, "output_index": 0, "content_index": 0,
            "delta": audio::encode(samples)
        }))
    }

    fn output_done(id: &str) -> ServerEvent {
        event(json!({
            "type": "response.output_item.done",
            "response_id": "r", "output_index": 0,
            "item": {"id": id, "type": "message", "role": "assistant", "status": "completed", "content": []}
        }))
    }

    fn replay(conversation: &mut Conversation, events: &[ServerEvent]) {
        for event in events {
            conversation.process(event);
        }
    }

    #[test]
    fn deltas_merge_in_first_seen_order() {
        let events = vec![
            assistant_created("a"),
            transcript_delta("a", "Hel"),
            assistant_created("b"),
            transcript_delta("b", "Other"),
            transcript_delta("a", "lo"),
            audio_delta("a", &[1, 2, 3]),
            output_done("a"),
        ];
        let mut conversation = Conversation::new();
        replay(&mut conversation, &events);

        let items = conversation.items();
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(items[0].formatted.transcript, "Hello");
        assert_eq!(items[0].status, ItemStatus::Completed);
        assert_eq!(items[0].formatted.audio.as_deref(), Some(&[1i16, 2, 3][..]));
        assert_eq!(items[1].status, ItemStatus::InProgress);
    }

    #[test]
    fn created_twice_does_not_duplicate() {
        let events = vec![assistant_created("a"), transcript_delta("a", "hi"), assistant_created("a")];
        let mut conversation = Conversation::new();
        replay(&mut conversation, &events);
        let items = conversation.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].formatted.transcript, "hi");
    }

    #[test]
    fn unseen_delta_creates_an_assistant_item() {
        let mut conversation = Conversation::new();
        let events = conversation.process(&audio_delta("x", &[5, 6]));
        match &events[..] {
            [ConversationEvent::Updated { item, delta: Some(delta) }] => {
                assert_eq!(item.id, "x");
                assert_eq!(item.role, ItemRole::Assistant);
                assert_eq!(delta.audio.as_deref(), Some(&[5i16, 6][..]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn user_transcript_arriving_early_is_queued() {
        let mut conversation = Conversation::new();
        conversation.process(&event(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "u1", "content_index": 0, "transcript": ""
        })));
        let events = conversation.process(&event(json!({
            "type": "conversation.item.created",
            "item": {"id": "u1", "type": "message", "role": "user", "content": [{"type": "input_audio"}]}
        })));
        assert!(matches!(events.last(), Some(ConversationEvent::Completed { item }) if item.formatted.transcript == " "));
    }

    #[test]
    fn speech_is_sliced_from_the_input_buffer() {
        let mut conversation = Conversation::new();
        conversation.append_input_audio(&vec![7; 48_000]);
        let started = conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_started", "audio_start_ms": 500, "item_id": "u1"
        })));
        assert_eq!(started, vec![ConversationEvent::Interrupted]);
        conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_stopped", "audio_end_ms": 1500, "item_id": "u1"
        })));
        conversation.process(&event(json!({
            "type": "conversation.item.created",
            "item": {"id": "u1", "type": "message", "role": "user", "content": []}
        })));
        assert_eq!(conversation.get("u1").unwrap().formatted.audio_len(), 24_000);
    }

    #[test]
    fn spoken_input_is_released_between_utterances() {
        let mut conversation = Conversation::new();
        conversation.append_input_audio(&vec![1; 72_000]);
        conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_started", "audio_start_ms": 1000, "item_id": "u1"
        })));
        conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_stopped", "audio_end_ms": 3000, "item_id": "u1"
        })));
        assert_eq!(conversation.input_audio.len(), 24_000);

        conversation.append_input_audio(&vec![2; 48_000]);
        conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_started", "audio_start_ms": 3500, "item_id": "u2"
        })));
        conversation.process(&event(json!({
            "type": "input_audio_buffer.speech_stopped", "audio_end_ms": 4500, "item_id": "u2"
        })));
        let speech = &conversation.queued_speech_audio["u2"];
        assert_eq!(speech.len(), 24_000);
        assert!(speech.iter().all(|&s| s == 2));
    }

    #[test]
    fn truncation_trims_audio_and_clears_transcript() {
        let mut conversation = Conversation::new();
        replay(&mut conversation, &[assistant_created("a"), transcript_delta("a", "long answer"), audio_delta("a", &vec![1; 4800])]);
        conversation.process(&event(json!({
            "type": "conversation.item.truncated", "item_id": "a", "content_index": 0, "audio_end_ms": 100
        })));
        let item = conversation.get("a").unwrap();
        assert_eq!(item.formatted.audio_len(), 2400);
        assert!(item.formatted.transcript.is_empty());
    }

    #[test]
    fn function_call_completes_with_arguments() {
        let mut conversation = Conversation::new();
        conversation.process(&event(json!({
            "type": "conversation.item.created",
            "item": {"id": "fc", "type": "function_call", "status": "in_progress", "call_id": "call_1", "name": "set_memory", "arguments": ""}
        })));
        conversation.process(&event(json!({
            "type": "response.function_call_arguments.delta",
            "response_id": "r", "item_id": "fc", "output_index": 0, "call_id": "call_1", "delta": "{\"key\":"
        })));
        let events = conversation.process(&event(json!({
            "type": "response.output_item.done",
            "response_id": "r", "output_index": 0,
            "item": {"id": "fc", "type": "function_call", "status": "completed", "call_id": "call_1",
                     "name": "set_memory", "arguments": "{\"key\":\"color\",\"value\":\"blue\"}"}
        })));
        let Some(ConversationEvent::Completed { item }) = events.last() else {
            panic!("expected completion");
        };
        let tool = item.formatted.tool.as_ref().unwrap();
        assert_eq!(tool.name, "set_memory");
        assert_eq!(tool.arguments, r#"{"key":"color","value":"blue"}"#);
    }

    #[test]
    fn deletion_removes_the_item() {
        let mut conversation = Conversation::new();
        replay(&mut conversation, &[assistant_created("a"), assistant_created("b")]);
        let events = conversation.process(&event(json!({"type": "conversation.item.deleted", "item_id": "a"})));
        assert_eq!(events, vec![ConversationEvent::Deleted { item_id: "a".to_string() }]);
        assert_eq!(conversation.items().len(), 1);
    }
}
