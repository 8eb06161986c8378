//! Ordered view-model of the conversation with images and decoded audio.

use std::sync::Arc;

use teddy_realtime_utils::wav;

use crate::error::ArtifactError;
use crate::types::audio::{samples_to_ms, PCM16_SAMPLE_RATE};
use crate::types::{ConversationItem, ImageArtifact, ItemKind, ItemRole, ItemStatus};

/// A completed item's audio rendered as a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub wav: Arc<[u8]>,
    pub duration_ms: i32,
}

impl AudioFile {
    pub fn decode(samples: &[i16]) -> Result<Self, ArtifactError> {
        let wav = wav::encode_wav(samples, PCM16_SAMPLE_RATE).map_err(|e| ArtifactError::Encode(e.to_string()))?;
        Ok(Self {
            wav: wav.into(),
            duration_ms: samples_to_ms(samples.len()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationWithImages {
    pub item: ConversationItem,
    pub images: Vec<ImageArtifact>,
    pub file: Option<AudioFile>,
}

/// Shape handed to persistence: the item without its merged payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConversationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub role: ItemRole,
    pub status: ItemStatus,
    pub images: Vec<ImageArtifact>,
}

impl From<&ConversationWithImages> for ConversationRecord {
    fn from(entry: &ConversationWithImages) -> Self {
        Self {
            id: entry.item.id.clone(),
            kind: entry.item.kind,
            role: entry.item.role,
            status: entry.item.status,
            images: entry.images.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    entries: Vec<ConversationWithImages>,
    pending_images: Vec<ImageArtifact>,
}

fn insert_by_time(images: &mut Vec<ImageArtifact>, image: ImageArtifact) {
    let at = images.partition_point(|existing| existing.timestamp <= image.timestamp);
    images.insert(at, image);
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConversationWithImages] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ConversationWithImages> {
        self.entries.iter().find(|entry| entry.item.id == id)
    }

    pub fn pending_images(&self) -> &[ImageArtifact] {
        &self.pending_images
    }

    /// Replaces the item in place, or appends it and hands it any pending images.
    pub fn upsert(&mut self, item: ConversationItem) {
        match self.entries.iter_mut().find(|entry| entry.item.id == item.id) {
            Some(entry) => entry.item = item,
            None => {
                let images = std::mem::take(&mut self.pending_images);
                self.entries.push(ConversationWithImages { item, images, file: None });
            }
        }
    }

    /// Attaches to the last item whatever its role, or holds the image for the
    /// next one.
    pub fn attach(&mut self, image: ImageArtifact) {
        match self.entries.last_mut() {
            Some(entry) => insert_by_time(&mut entry.images, image),
            None => insert_by_time(&mut self.pending_images, image),
        }
    }

    /// Returns false when the item was deleted before decoding finished.
    pub fn attach_audio_file(&mut self, id: &str, file: AudioFile) -> bool {
        match self.entries.iter_mut().find(|entry| entry.item.id == id) {
            Some(entry) => {
                entry.file = Some(file);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<ConversationWithImages> {
        let at = self.entries.iter().position(|entry| entry.item.id == id)?;
        Some(self.entries.remove(at))
    }

    pub fn records(&self) -> Vec<ConversationRecord> {
        self.entries.iter().map(ConversationRecord::from).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, role: ItemRole) -> ConversationItem {
        ConversationItem::new(id, ItemKind::Message, role)
    }

    fn image(url: &str, timestamp: i64) -> ImageArtifact {
        ImageArtifact { url: url.to_string(), timestamp }
    }

    #[test]
    fn upsert_keeps_first_seen_order() {
        let mut reconciler = Reconciler::new();
        reconciler.upsert(item("a", ItemRole::User));
        reconciler.upsert(item("b", ItemRole::Assistant));
        let mut updated = item("a", ItemRole::User);
        updated.formatted.text = "hi".to_string();
        reconciler.upsert(updated.clone());
        reconciler.upsert(updated);

        let ids: Vec<_> = reconciler.entries().iter().map(|e| e.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(reconciler.entries()[0].item.formatted.text, "hi");
    }

    #[test]
    fn images_are_ordered_by_capture_time() {
        let mut reconciler = Reconciler::new();
        reconciler.upsert(item("a", ItemRole::Assistant));
        reconciler.attach(image("late", 2_000));
        reconciler.attach(image("early", 1_000));

        let urls: Vec<_> = reconciler.entries()[0].images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["early", "late"]);
    }

    #[test]
    fn pending_images_go_to_the_next_new_item() {
        let mut reconciler = Reconciler::new();
        reconciler.attach(image("first", 10));
        assert_eq!(reconciler.pending_images().len(), 1);

        reconciler.upsert(item("a", ItemRole::User));
        assert!(reconciler.pending_images().is_empty());
        assert_eq!(reconciler.entries()[0].images, vec![image("first", 10)]);

        reconciler.upsert(item("a", ItemRole::User));
        assert_eq!(reconciler.entries()[0].images.len(), 1);
    }

    #[test]
    fn decoded_audio_is_dropped_for_deleted_items() {
        let mut reconciler = Reconciler::new();
        reconciler.upsert(item("a", ItemRole::Assistant));
        let file = AudioFile::decode(&[0; 2400]).unwrap();
        assert_eq!(file.duration_ms, 100);

        reconciler.remove("a");
        assert!(!reconciler.attach_audio_file("a", file.clone()));

        reconciler.upsert(item("b", ItemRole::Assistant));
        assert!(reconciler.attach_audio_file("b", file));
        assert!(reconciler.get("b").unwrap().file.is_some());
    }

    #[test]
    fn records_omit_the_merged_payload() {
        let mut reconciler = Reconciler::new();
        let mut user = item("a", ItemRole::User);
        user.formatted.transcript = "secret".to_string();
        reconciler.upsert(user);
        reconciler.attach(image("u", 5));

        let json = serde_json::to_value(reconciler.records()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "id": "a",
                "type": "message",
                "role": "user",
                "status": "in_progress",
                "images": [{"url": "u", "timestamp": 5}],
            }])
        );
    }
}
