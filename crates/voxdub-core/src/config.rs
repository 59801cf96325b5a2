//! Configuration loading and validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level voxdub configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Client pipeline ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Processing endpoint URL (the gateway's `/process-audio`).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Capture cadence in milliseconds (default: 1000).
    #[serde(default = "default_chunk_interval")]
    pub chunk_interval_ms: u64,

    /// Chunks per batch (default: 3).
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// How long failure notifications stay visible (default: 3000).
    #[serde(default = "default_notification_ttl")]
    pub notification_ttl_ms: u64,

    /// Transport timeout for one submission request (default: 60000).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Settings file override (default: `~/.voxdub/settings.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            chunk_interval_ms: default_chunk_interval(),
            batch_threshold: default_batch_threshold(),
            notification_ttl_ms: default_notification_ttl(),
            request_timeout_ms: default_request_timeout(),
            settings_path: None,
        }
    }
}

fn default_endpoint() -> String {
    format!("http://127.0.0.1:{}/process-audio", default_port())
}

fn default_chunk_interval() -> u64 {
    1000
}

fn default_batch_threshold() -> usize {
    3
}

fn default_notification_ttl() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    60_000
}

// --- Server-side processing ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Job status poll interval in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum status checks before the job times out (default: 30).
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Directory for transient objects (default: `~/.voxdub/storage`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,

    /// Speech-to-text configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    /// Text-to-speech configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            storage_dir: None,
            transcription: None,
            tts: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    30
}

/// Voice transcription (speech-to-text) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "groq" or "openai" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override for self-hosted Whisper-compatible servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_transcription_provider() -> String {
    "groq".into()
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
            base_url: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Text-to-speech (TTS) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider (default: "elevenlabs").
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Default model ID (e.g. "eleven_multilingual_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Output format (default: "mp3_44100_128").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    /// Voice name to provider voice ID. Keys are either `"<voice>"` or
    /// `"<accent>/<voice>"`; the accent-qualified key wins. Unmapped names
    /// are sent as-is.
    #[serde(default)]
    pub voices: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            api_key: None,
            api_key_env: None,
            default_model: None,
            output_format: None,
            voices: HashMap::new(),
            base_url: None,
        }
    }
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Provider voice ID for a voice name spoken with `accent`.
    pub fn voice_id<'a>(&'a self, accent: &str, voice: &'a str) -> &'a str {
        self.voices
            .get(&format!("{accent}/{voice}"))
            .or_else(|| self.voices.get(voice))
            .map(String::as_str)
            .unwrap_or(voice)
    }
}

// --- Gateway ---

/// How synthesized audio is encoded in a successful response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseEncoding {
    /// Raw bytes, `audio/mpeg`.
    #[default]
    Binary,
    /// Base64 text body.
    Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Largest accepted multipart body (default: 10 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub response_encoding: ResponseEncoding,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            max_upload_bytes: default_max_upload_bytes(),
            response_encoding: ResponseEncoding::default(),
        }
    }
}

fn default_port() -> u16 {
    8787
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxdub_processor=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::VoxdubError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoxdubError::Io)?;

        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxdubError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.pipeline.clone().unwrap_or_default()
    }

    pub fn processor(&self) -> ProcessorConfig {
        self.processor.clone().unwrap_or_default()
    }

    /// Get the gateway port.
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .map(|s| s.port)
            .unwrap_or_else(default_port)
    }

    /// Get the gateway bind address.
    pub fn server_bind(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server
            .as_ref()
            .map(|s| s.max_upload_bytes)
            .unwrap_or_else(default_max_upload_bytes)
    }

    pub fn response_encoding(&self) -> ResponseEncoding {
        self.server
            .as_ref()
            .map(|s| s.response_encoding)
            .unwrap_or_default()
    }

    /// Directory holding transient `input/` and `transcript/` objects.
    pub fn storage_dir(&self) -> PathBuf {
        self.processor
            .as_ref()
            .and_then(|p| p.storage_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("storage"))
    }

    /// Settings file read before each submission.
    pub fn settings_path(&self) -> PathBuf {
        self.pipeline
            .as_ref()
            .and_then(|p| p.settings_path.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("settings.json"))
    }

    /// Get a config value by dotted path (e.g. "server.port", "pipeline.endpoint").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(p) = &self.pipeline {
            if p.batch_threshold == 0 {
                errors.push("pipeline.batch_threshold must be at least 1".to_string());
            }
            if p.chunk_interval_ms == 0 {
                errors.push("pipeline.chunk_interval_ms cannot be 0".to_string());
            }
            if !p.endpoint.starts_with("http://") && !p.endpoint.starts_with("https://") {
                errors.push(format!(
                    "pipeline.endpoint is not an http(s) URL: {}",
                    p.endpoint
                ));
            }
        }

        let processor = self.processor();
        if processor.max_poll_attempts == 0 {
            errors.push("processor.max_poll_attempts must be at least 1".to_string());
        }
        match &processor.transcription {
            Some(t) if t.resolve_api_key().is_none() => warnings.push(format!(
                "Transcription provider '{}' has no API key configured",
                t.provider
            )),
            None => warnings.push("No transcription provider configured".to_string()),
            _ => {}
        }
        match &processor.tts {
            Some(t) if t.resolve_api_key().is_none() => warnings.push(format!(
                "TTS provider '{}' has no API key configured",
                t.provider
            )),
            None => warnings.push("No TTS provider configured".to_string()),
            _ => {}
        }

        if let Some(s) = &self.server {
            if s.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for voxdub data: `~/.voxdub/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxdub")
}
