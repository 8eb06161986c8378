use async_trait::async_trait;
use base64::Engine;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ArtifactError;

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";

const DESCRIBE_PROMPT: &str = "Describe the image provided";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Returns a natural-language description of a JPEG.
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<String, ArtifactError>;
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

/// Chat-completions client sending the image as a data URL.
pub struct OpenAiVision {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiVision {
    pub fn new(base_url: &str, api_key: SecretString, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    fn request_body(&self, jpeg: &[u8]) -> serde_json::Value {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(jpeg)
        );
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": DESCRIBE_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl VisionAnalyzer for OpenAiVision {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<String, ArtifactError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(&jpeg))
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        resp.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ArtifactError::Response("no choices in vision response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_sent_as_a_data_url() {
        let vision = OpenAiVision::new("https://api.openai.com/v1/", SecretString::from("sk-test"), "gpt-4o");
        let body = vision.request_body(&[0xff, 0xd8]);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["content"], "Describe the image provided");
        assert_eq!(
            body["messages"][1]["content"][0]["image_url"]["url"],
            "data:image/jpeg;base64,/9g="
        );
    }

    #[test]
    fn response_takes_the_first_choice() {
        let resp: LlmResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"a red ball"}}]}"#).unwrap();
        assert_eq!(resp.choices[0].message.content, "a red ball");
    }
}
