pub mod session;
pub mod tools;
pub mod audio;
pub mod events;
pub mod conversation;
mod content;

pub use session::Session;
pub use content::items::{Item, FunctionCallItem, FunctionCallOutputItem};
pub use content::message::*;
pub use content::parts::ContentPart;
pub use events::{ClientEvent, ServerEvent};
pub use conversation::{ConversationItem, FormattedContent, ImageArtifact, ItemDelta, ItemKind, ItemRole, ItemStatus, ToolCall};
