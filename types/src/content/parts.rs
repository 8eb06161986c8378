/// Content part announced by `response.content_part.added` / `.done`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    Audio {
        #[serde(default)]
        transcript: String,
    },
}
