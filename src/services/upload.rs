use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::ArtifactError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageUploader: Send + Sync {
    /// Uploads a JPEG and returns its public URL, or `None` if the store refused it.
    async fn upload(&self, jpeg: Vec<u8>) -> Result<Option<String>, ArtifactError>;
}

/// PUTs images to `<base>/images/<user>/<uuid>.jpg`.
pub struct HttpImageUploader {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl HttpImageUploader {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn object_url(&self) -> String {
        format!("{}/images/{}/{}.jpg", self.base_url, self.user_id, uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl ImageUploader for HttpImageUploader {
    async fn upload(&self, jpeg: Vec<u8>) -> Result<Option<String>, ArtifactError> {
        let url = self.object_url();
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!("image upload rejected with {}", response.status());
            return Ok(None);
        }
        Ok(Some(url))
    }
}
