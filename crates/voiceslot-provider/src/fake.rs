//! In-memory fake provider for tests and local development without live
//! vendor credentials. Clones are assigned sequential ids; synthesis
//! returns a small fixed payload rather than real audio.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use voiceslot_core::errors::ProviderResult;
use voiceslot_core::ports::{VoiceServiceProviderPort, VoiceSettings};

pub struct FakeVoiceServiceProvider {
    next_id: AtomicU64,
    deleted: Mutex<Vec<String>>,
}

impl FakeVoiceServiceProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            deleted: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn deleted_voice_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for FakeVoiceServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceServiceProviderPort for FakeVoiceServiceProvider {
    async fn clone_voice(&self, _sample_bytes: Bytes, name: &str, _language: &str) -> ProviderResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake_{id}_{name}"))
    }

    async fn delete_voice(&self, remote_voice_id: &str) -> ProviderResult<()> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(remote_voice_id.to_string());
        Ok(())
    }

    async fn synthesize_speech(
        &self,
        remote_voice_id: &str,
        text: &str,
        _settings: &VoiceSettings,
    ) -> ProviderResult<Bytes> {
        Ok(Bytes::from(format!("fake-mp3:{remote_voice_id}:{text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clone_then_delete_tracks_deletions() {
        let provider = FakeVoiceServiceProvider::new();
        let id = provider
            .clone_voice(Bytes::from_static(b"sample"), "Narrator", "en")
            .await
            .unwrap();
        provider.delete_voice(&id).await.unwrap();
        assert_eq!(provider.deleted_voice_ids(), vec![id]);
    }
}
