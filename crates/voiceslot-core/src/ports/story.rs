//! Story content lookup (§1: "the story content store" is an external
//! collaborator, in scope only through this narrow contract). The
//! synthesis worker resolves story text through this port rather than
//! interpreting story rows itself — the core never learns how stories are
//! authored or stored beyond "text for an id".

use async_trait::async_trait;

use crate::errors::VoiceError;

#[async_trait]
pub trait StoryContentPort: Send + Sync {
    /// Resolves the synthesizable text for `story_id`. `VoiceError::NotFound`
    /// if the story does not exist.
    async fn get_text(&self, story_id: i64) -> Result<String, VoiceError>;
}
