//! The upstream TTS provider capability set (§6).
//!
//! Per-request dynamic dispatch on a provider-name string is the pattern
//! this replaces: one implementation per provider, selected once when the
//! voice's `service_provider` is known, rather than branching throughout
//! the call sites.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::ProviderResult;

/// Settings forwarded to the synthesis call (speed, stability, etc.). Left
/// as an open JSON bag — the core does not interpret these values, it only
/// threads them through to the provider.
pub type VoiceSettings = serde_json::Value;

#[async_trait]
pub trait VoiceServiceProviderPort: Send + Sync {
    /// Clones a voice from a sample recording. May fail with
    /// `ProviderError::RateLimited { retry_after_secs }`.
    async fn clone_voice(
        &self,
        sample_bytes: Bytes,
        name: &str,
        language: &str,
    ) -> ProviderResult<String>;

    /// Idempotent: deleting an already-deleted voice is not an error.
    async fn delete_voice(&self, remote_voice_id: &str) -> ProviderResult<()>;

    /// Synthesizes speech for `text` in the given cloned voice. Streams
    /// back a complete mp3 payload.
    async fn synthesize_speech(
        &self,
        remote_voice_id: &str,
        text: &str,
        settings: &VoiceSettings,
    ) -> ProviderResult<Bytes>;
}
