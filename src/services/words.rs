use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::ArtifactError;

/// Source of the words the assistant must never say.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WordListProvider: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<String>, ArtifactError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticWordList(pub Vec<String>);

#[async_trait]
impl WordListProvider for StaticWordList {
    async fn list(&self, _user_id: &str) -> Result<Vec<String>, ArtifactError> {
        Ok(self.0.clone())
    }
}

/// One word per line; blank lines are skipped.
#[derive(Debug, Clone)]
pub struct FileWordList {
    path: PathBuf,
}

impl FileWordList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WordListProvider for FileWordList {
    async fn list(&self, _user_id: &str) -> Result<Vec<String>, ArtifactError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ng.txt");
        std::fs::write(&path, "stupid\n\n  dumb \n").unwrap();

        let words = FileWordList::new(&path).list("kid-1").await.unwrap();
        assert_eq!(words, vec!["stupid", "dumb"]);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let words = FileWordList::new("/nonexistent/ng.txt").list("kid-1").await;
        assert!(matches!(words, Err(ArtifactError::Io(_))));
    }
}
