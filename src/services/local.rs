use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};

/// Captured frames kept on this machine, keyed `capture-<ISO time>`.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactStore {
    frames: Arc<Mutex<BTreeMap<String, Arc<[u8]>>>>,
}

impl LocalArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, captured_at: DateTime<Utc>, jpeg: &[u8]) -> String {
        let key = format!("capture-{}", captured_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        if let Ok(mut frames) = self.frames.lock() {
            frames.insert(key.clone(), jpeg.into());
        }
        key
    }

    /// The frame under the greatest key, which is the latest capture.
    pub fn most_recent(&self) -> Option<Arc<[u8]>> {
        let frames = self.frames.lock().ok()?;
        frames.values().next_back().cloned()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn most_recent_is_the_latest_capture() {
        let store = LocalArtifactStore::new();
        assert!(store.most_recent().is_none());

        let later = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(store.save(later, b"later"), "capture-2024-05-01T10:00:05.000Z");
        store.save(earlier, b"earlier");

        assert_eq!(store.len(), 2);
        assert_eq!(&*store.most_recent().unwrap(), b"later");
    }
}
