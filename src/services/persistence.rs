use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::ArtifactError;
use crate::reconciler::ConversationRecord;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Stores one finished conversation for `user_id`.
    async fn save(&self, user_id: &str, records: Vec<ConversationRecord>) -> Result<(), ArtifactError>;
}

/// Writes `conversations/<user>/<unix-ms>.json` under a root directory.
#[derive(Debug, Clone)]
pub struct FsConversationStore {
    root: PathBuf,
}

impl FsConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PersistenceStore for FsConversationStore {
    async fn save(&self, user_id: &str, records: Vec<ConversationRecord>) -> Result<(), ArtifactError> {
        let dir = self.root.join("conversations").join(user_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", chrono::Utc::now().timestamp_millis()));
        let body = serde_json::to_vec(&records)?;
        tokio::fs::write(&path, body).await?;
        tracing::info!("saved {} conversation items to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageArtifact, ItemKind, ItemRole, ItemStatus};

    #[tokio::test]
    async fn writes_one_file_per_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConversationStore::new(dir.path());
        let records = vec![ConversationRecord {
            id: "item_1".to_string(),
            kind: ItemKind::Message,
            role: ItemRole::User,
            status: ItemStatus::Completed,
            images: vec![ImageArtifact { url: "https://img/1.jpg".to_string(), timestamp: 7 }],
        }];

        store.save("kid-1", records).await.unwrap();

        let user_dir = dir.path().join("conversations").join("kid-1");
        let files: Vec<_> = std::fs::read_dir(&user_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        assert_eq!(path.extension().unwrap(), "json");
        let saved: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(saved[0]["id"], "item_1");
        assert_eq!(saved[0]["images"][0]["timestamp"], 7);
        assert!(saved[0].get("formatted").is_none());
    }
}
