pub use crate::content::items::ItemStatus as ResourceStatus;
use crate::content::message::MessageRole;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionResource {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Remaining session fields echoed by the server.
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationResource {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

/// Conversation item as reported by the server.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ItemResource {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default)]
    pub status: Option<ResourceStatus>,
    #[serde(default)]
    pub role: Option<MessageRole>,
    #[serde(default)]
    pub content: Option<Vec<ContentResource>>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// One entry of an item's `content` array; `kind` is `input_text`,
/// `input_audio`, `text` or `audio`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContentResource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    pub id: String,
    /// `in_progress`, `completed`, `cancelled`, `failed` or `incomplete`
    pub status: String,
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Vec<ItemResource>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub total_tokens: i32,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitInformation {
    pub name: String,
    pub limit: i32,
    pub remaining: i32,
    pub reset_seconds: f32,
}
