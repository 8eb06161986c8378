//! Out-of-process collaborators: conversation persistence, image upload,
//! image description and the moderation word list.

pub mod local;
pub mod persistence;
pub mod upload;
pub mod vision;
pub mod words;

pub use local::LocalArtifactStore;
pub use persistence::{FsConversationStore, PersistenceStore};
pub use upload::{HttpImageUploader, ImageUploader};
pub use vision::{OpenAiVision, VisionAnalyzer};
pub use words::{FileWordList, StaticWordList, WordListProvider};
