//! Transcript document written by the transcription service.
//!
//! Shape: `{"jobName": "...", "results": {"transcripts": [{"transcript": "..."}]}}`.

use serde::{Deserialize, Serialize};

use voxdub_core::error::{Result, VoxdubError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    #[serde(rename = "jobName", default, skip_serializing_if = "String::is_empty")]
    pub job_name: String,
    pub results: TranscriptResults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptResults {
    #[serde(default)]
    pub transcripts: Vec<TranscriptAlternative>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAlternative {
    pub transcript: String,
}

impl TranscriptDocument {
    pub fn new(job_name: &str, text: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            results: TranscriptResults {
                transcripts: vec![TranscriptAlternative {
                    transcript: text.to_string(),
                }],
            },
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| VoxdubError::Transcription(format!("malformed transcript: {e}")))
    }

    /// Text of the first alternative.
    pub fn text(&self) -> Option<&str> {
        self.results
            .transcripts
            .first()
            .map(|t| t.transcript.as_str())
    }
}

/// Extract synthesizable text from a stored transcript document.
///
/// A blank transcript has nothing to synthesize and is an error.
pub fn extract_text(raw: &[u8]) -> Result<String> {
    let doc = TranscriptDocument::parse(raw)?;
    match doc.text().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(VoxdubError::Transcription(
            "transcript contained no speech".into(),
        )),
    }
}
