//! ElevenLabs instant voice cloning + text-to-speech.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use voiceslot_core::errors::{ProviderError, ProviderResult};
use voiceslot_core::ports::VoiceSettings;

const BASE_URL: &str = "https://api.elevenlabs.io/v1";

pub struct ElevenLabsProvider {
    client: Client,
    api_key: String,
}

impl ElevenLabsProvider {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct CloneResponse {
    voice_id: String,
}

fn map_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(30),
        }
    } else {
        ProviderError::RequestFailed {
            message: format!("elevenlabs {status}: {body}"),
        }
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl voiceslot_core::ports::VoiceServiceProviderPort for ElevenLabsProvider {
    async fn clone_voice(&self, sample_bytes: Bytes, name: &str, _language: &str) -> ProviderResult<String> {
        let part = reqwest::multipart::Part::bytes(sample_bytes.to_vec()).file_name("sample.wav");
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .part("files", part);

        let response = self
            .client
            .post(format!("{BASE_URL}/voices/add"))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &body));
        }

        let parsed: CloneResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::RequestFailed { message: e.to_string() })?;
        Ok(parsed.voice_id)
    }

    async fn delete_voice(&self, remote_voice_id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(format!("{BASE_URL}/voices/{remote_voice_id}"))
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed { message: e.to_string() })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let retry_after = retry_after_header(&response);
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, retry_after, &body))
    }

    async fn synthesize_speech(
        &self,
        remote_voice_id: &str,
        text: &str,
        settings: &VoiceSettings,
    ) -> ProviderResult<Bytes> {
        let body = serde_json::json!({
            "text": text,
            "model_id": settings.get("model_id").and_then(|v| v.as_str()).unwrap_or("eleven_multilingual_v2"),
            "voice_settings": settings,
        });

        let response = self
            .client
            .post(format!("{BASE_URL}/text-to-speech/{remote_voice_id}"))
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &body));
        }
        response
            .bytes()
            .await
            .map_err(|e| ProviderError::RequestFailed { message: e.to_string() })
    }
}
