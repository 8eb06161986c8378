//! Locally handled function tools.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::services::{LocalArtifactStore, VisionAnalyzer};
use crate::types::tools::{FunctionTool, Tool};

/// Values the assistant chose to remember about the user.
pub type Memory = Arc<Mutex<BTreeMap<String, String>>>;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.0)(arguments).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Clone)]
pub struct ToolRegistration {
    pub definition: FunctionTool,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Clone, Default)]
pub struct ToolDispatcher {
    tools: Vec<ToolRegistration>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool. A second registration under the same name replaces the first.
    pub fn register(&mut self, definition: FunctionTool, handler: Arc<dyn ToolHandler>) {
        let registration = ToolRegistration { definition, handler };
        match self
            .tools
            .iter_mut()
            .find(|tool| tool.definition.name() == registration.definition.name())
        {
            Some(existing) => *existing = registration,
            None => self.tools.push(registration),
        }
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.definition.clone().into()).collect()
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .iter()
            .find(|tool| tool.definition.name() == name)
            .map(|tool| tool.handler.clone())
    }
}

/// Failures become `{"error": "..."}` so the model can see them.
pub async fn settle(handler: Option<Arc<dyn ToolHandler>>, name: &str, arguments: &str) -> Value {
    let result = match handler {
        None => Err(ToolError::UnknownTool(name.to_string())),
        Some(handler) => match serde_json::from_str::<Value>(arguments) {
            Ok(arguments) => handler.call(arguments).await,
            Err(e) => Err(ToolError::InvalidArguments(e)),
        },
    };
    result.unwrap_or_else(|e| {
        tracing::error!("tool {} failed: {}", name, e);
        json!({ "error": e.to_string() })
    })
}

#[derive(Debug, Deserialize)]
struct SetMemoryArgs {
    key: String,
    value: String,
}

pub struct SetMemory {
    memory: Memory,
}

impl SetMemory {
    pub const NAME: &'static str = "set_memory";

    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    pub fn definition() -> FunctionTool {
        FunctionTool::new(
            Self::NAME,
            "Saves important data about the user into memory.",
            json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The key of the memory value. Always use lowercase and underscores, no other characters."
                    },
                    "value": {
                        "type": "string",
                        "description": "Value can be anything represented as a string"
                    }
                },
                "required": ["key", "value"]
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for SetMemory {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let SetMemoryArgs { key, value } = serde_json::from_value(arguments)?;
        self.memory
            .lock()
            .map_err(|_| ToolError::Handler("memory is unavailable".to_string()))?
            .insert(key, value);
        Ok(json!({ "ok": true }))
    }
}

pub struct AnalyzeRecentImage {
    artifacts: LocalArtifactStore,
    vision: Option<Arc<dyn VisionAnalyzer>>,
}

impl AnalyzeRecentImage {
    pub const NAME: &'static str = "analyze_recent_image";

    pub fn new(artifacts: LocalArtifactStore, vision: Option<Arc<dyn VisionAnalyzer>>) -> Self {
        Self { artifacts, vision }
    }

    pub fn definition() -> FunctionTool {
        FunctionTool::new(
            Self::NAME,
            "Analyzes the most recent captured image using LLM.",
            json!({ "type": "object", "properties": {} }),
        )
    }
}

#[async_trait]
impl ToolHandler for AnalyzeRecentImage {
    async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
        let Some(jpeg) = self.artifacts.most_recent() else {
            return Ok(json!({ "error": "No recent image found." }));
        };
        let vision = self
            .vision
            .as_ref()
            .ok_or_else(|| ToolError::Handler("image analysis is not configured".to_string()))?;
        let analysis = vision
            .analyze(jpeg.to_vec())
            .await
            .map_err(|e| ToolError::Handler(e.to_string()))?;
        Ok(json!({ "analysis": analysis }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArtifactError;
    use crate::services::vision::MockVisionAnalyzer;

    async fn run(dispatcher: &ToolDispatcher, name: &str, arguments: &str) -> Value {
        settle(dispatcher.handler(name), name, arguments).await
    }

    fn echo_tool(name: &str) -> FunctionTool {
        FunctionTool::new(name, "echo", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn set_memory_stores_the_pair() {
        let memory = Memory::default();
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(SetMemory::definition(), Arc::new(SetMemory::new(memory.clone())));

        let result = run(&dispatcher, "set_memory", r#"{"key":"color","value":"blue"}"#).await;
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(memory.lock().unwrap().get("color").map(String::as_str), Some("blue"));
    }

    #[tokio::test]
    async fn bad_arguments_settle_as_error_payloads() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(SetMemory::definition(), Arc::new(SetMemory::new(Memory::default())));

        let result = run(&dispatcher, "set_memory", "{not json").await;
        assert!(result["error"].as_str().unwrap().starts_with("invalid tool arguments"));

        let result = run(&dispatcher, "set_memory", r#"{"key":"color"}"#).await;
        assert!(result.get("error").is_some());

        let result = run(&dispatcher, "missing", "{}").await;
        assert_eq!(result, json!({"error": "tool \"missing\" has not been added"}));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(echo_tool("echo"), handler_fn(|_| async { Ok(json!(1)) }));
        dispatcher.register(echo_tool("other"), handler_fn(|_| async { Ok(json!(0)) }));
        dispatcher.register(echo_tool("echo"), handler_fn(|args| async move { Ok(args) }));

        assert_eq!(dispatcher.definitions().len(), 2);
        assert_eq!(dispatcher.definitions()[0].name(), "echo");
        assert_eq!(run(&dispatcher, "echo", r#"{"a":2}"#).await, json!({"a": 2}));
    }

    #[tokio::test]
    async fn analyze_without_a_capture() {
        let mut vision = MockVisionAnalyzer::new();
        vision.expect_analyze().never();
        let tool = AnalyzeRecentImage::new(LocalArtifactStore::new(), Some(Arc::new(vision)));
        assert_eq!(tool.call(json!({})).await.unwrap(), json!({"error": "No recent image found."}));
    }

    #[tokio::test]
    async fn analyze_describes_the_latest_capture() {
        let artifacts = LocalArtifactStore::new();
        artifacts.save(chrono::Utc::now(), b"jpeg");
        let mut vision = MockVisionAnalyzer::new();
        vision
            .expect_analyze()
            .withf(|jpeg| jpeg.as_slice() == b"jpeg")
            .times(1)
            .returning(|_| Ok("a teddy bear".to_string()));

        let tool = AnalyzeRecentImage::new(artifacts, Some(Arc::new(vision)));
        assert_eq!(tool.call(json!({})).await.unwrap(), json!({"analysis": "a teddy bear"}));
    }

    #[tokio::test]
    async fn vision_failures_become_handler_errors() {
        let artifacts = LocalArtifactStore::new();
        artifacts.save(chrono::Utc::now(), b"jpeg");
        let mut vision = MockVisionAnalyzer::new();
        vision
            .expect_analyze()
            .returning(|_| Err(ArtifactError::Response("down".to_string())));

        let tool = AnalyzeRecentImage::new(artifacts, Some(Arc::new(vision)));
        assert!(matches!(tool.call(json!({})).await, Err(ToolError::Handler(_))));
    }
}
