//! Cartesia voice cloning + text-to-speech. Same shape as the ElevenLabs
//! adapter, different wire format.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use voiceslot_core::errors::{ProviderError, ProviderResult};
use voiceslot_core::ports::VoiceSettings;

const BASE_URL: &str = "https://api.cartesia.ai";
const API_VERSION: &str = "2024-06-10";

pub struct CartesiaProvider {
    client: Client,
    api_key: String,
}

impl CartesiaProvider {
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
    id: String,
}

fn map_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(30),
        }
    } else {
        ProviderError::RequestFailed {
            message: format!("cartesia {status}: {body}"),
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
impl voiceslot_core::ports::VoiceServiceProviderPort for CartesiaProvider {
    async fn clone_voice(&self, sample_bytes: Bytes, name: &str, language: &str) -> ProviderResult<String> {
        let part = reqwest::multipart::Part::bytes(sample_bytes.to_vec()).file_name("sample.wav");
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .text("language", language.to_string())
            .part("clip", part);

        let response = self
            .client
            .post(format!("{BASE_URL}/voices/clone"))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
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
        Ok(parsed.id)
    }

    async fn delete_voice(&self, remote_voice_id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(format!("{BASE_URL}/voices/{remote_voice_id}"))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
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
            "transcript": text,
            "voice": { "mode": "id", "id": remote_voice_id },
            "model_id": settings.get("model_id").and_then(|v| v.as_str()).unwrap_or("sonic-english"),
            "output_format": { "container": "mp3", "sample_rate": 44100 },
        });

        let response = self
            .client
            .post(format!("{BASE_URL}/tts/bytes"))
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
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
