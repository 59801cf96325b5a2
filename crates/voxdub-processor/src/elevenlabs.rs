//! Speech synthesis via the ElevenLabs text-to-speech API.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, info};

use voxdub_core::config::TtsConfig;
use voxdub_core::error::{Result, VoxdubError};

use crate::whisper::whisper_language;
use crate::{SpeechRequest, SpeechSynthesizer};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

pub struct ElevenLabsSynthesizer {
    config: TtsConfig,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: TtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> Option<String> {
        self.config
            .resolve_api_key()
            .or_else(|| std::env::var("ELEVENLABS_API_KEY").ok().filter(|v| !v.is_empty()))
    }

    fn output_format(&self) -> &str {
        self.config
            .output_format
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_FORMAT)
    }

    fn model_id(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// JSON body for one request. The accent goes out as an ISO 639-1
    /// `language_code` (`en-GB` -> `en`).
    pub fn request_body(&self, request: &SpeechRequest) -> serde_json::Value {
        json!({
            "text": request.text,
            "model_id": self.model_id(),
            "language_code": whisper_language(&request.language_code),
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75
            }
        })
    }

    pub fn endpoint(&self, voice_id: &str, output_format: &str) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/v1/text-to-speech/{voice_id}?output_format={output_format}")
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Bytes> {
        let api_key = self.api_key().ok_or_else(|| {
            VoxdubError::Synthesis(
                "TTS not configured. Set processor.tts.api_key or ELEVENLABS_API_KEY.".into(),
            )
        })?;

        let voice_id = self
            .config
            .voice_id(&request.language_code, &request.voice);
        let url = self.endpoint(voice_id, self.output_format());

        debug!(
            voice = %request.voice,
            accent = %request.language_code,
            voice_id,
            model_id = self.model_id(),
            chars = request.text.len(),
            "Requesting speech"
        );

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &api_key)
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| VoxdubError::Synthesis(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoxdubError::Synthesis(format!(
                "ElevenLabs API error ({status}): {body}"
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| VoxdubError::Synthesis(e.to_string()))?;
        info!(voice_id, bytes = audio.len(), "Speech synthesized");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config() -> TtsConfig {
        TtsConfig {
            provider: "elevenlabs".into(),
            api_key: Some("test-key".into()),
            api_key_env: None,
            default_model: None,
            output_format: None,
            voices: HashMap::from([
                ("Matthew".to_string(), "voice-matthew".to_string()),
                ("en-GB/Matthew".to_string(), "voice-matthew-gb".to_string()),
            ]),
            base_url: Some("http://127.0.0.1:1/".into()),
        }
    }

    #[test]
    fn test_endpoint_uses_base_url() {
        let synth = ElevenLabsSynthesizer::new(config());
        assert_eq!(
            synth.endpoint("abc", "mp3_44100_128"),
            "http://127.0.0.1:1/v1/text-to-speech/abc?output_format=mp3_44100_128"
        );
    }

    #[test]
    fn test_output_format_override() {
        let mut cfg = config();
        let synth = ElevenLabsSynthesizer::new(cfg.clone());
        assert_eq!(synth.output_format(), "mp3_44100_128");

        cfg.output_format = Some("mp3_22050_32".into());
        let synth = ElevenLabsSynthesizer::new(cfg);
        assert_eq!(synth.output_format(), "mp3_22050_32");
    }

    #[test]
    fn test_request_body_forwards_accent() {
        let synth = ElevenLabsSynthesizer::new(config());
        let body = synth.request_body(&SpeechRequest::mp3("cheerio".into(), "Amy", "en-GB"));
        assert_eq!(body["text"], "cheerio");
        assert_eq!(body["language_code"], "en");
        assert_eq!(body["model_id"], DEFAULT_MODEL);

        let body = synth.request_body(&SpeechRequest::mp3("hola".into(), "Lupe", "es-MX"));
        assert_eq!(body["language_code"], "es");
    }

    #[tokio::test]
    async fn test_transport_error_is_synthesis_error() {
        let synth = ElevenLabsSynthesizer::new(config());
        let err = synth
            .synthesize(&SpeechRequest::mp3("hi".into(), "Matthew", "en-GB"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "synthesis");
    }
}
