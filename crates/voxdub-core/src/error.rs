use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxdubError {
    #[error("Live source has no audio track")]
    NoAudioSource,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transcription job failed: {0}")]
    JobFailed(String),

    #[error("Transcription job timed out after {attempts} polls ({waited_ms}ms)")]
    JobTimedOut { attempts: u32, waited_ms: u64 },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoxdubError {
    /// Stable machine-readable kind, used as the `kind` field of gateway error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::JobFailed(_) => "job_failed",
            Self::JobTimedOut { .. } => "job_timed_out",
            Self::Storage(_) => "storage",
            Self::Transcription(_) => "transcription",
            Self::Synthesis(_) => "synthesis",
            Self::Network(_) => "network",
            Self::Playback(_) => "playback",
            Self::NoAudioSource | Self::Capture(_) => "capture",
            _ => "internal",
        }
    }

    /// Rebuild an error from a gateway error body.
    ///
    /// Only job outcomes survive the trip; everything else the client sees
    /// is a network failure.
    pub fn from_remote(kind: Option<&str>, message: String) -> Self {
        match kind {
            Some("job_failed") => {
                let reason = message
                    .strip_prefix("Transcription job failed: ")
                    .map(str::to_string)
                    .unwrap_or(message);
                Self::JobFailed(reason)
            }
            Some("job_timed_out") => {
                let (attempts, waited_ms) = parse_timeout_message(&message).unwrap_or((0, 0));
                Self::JobTimedOut {
                    attempts,
                    waited_ms,
                }
            }
            _ => Self::Network(message),
        }
    }
}

/// Parse "... after {attempts} polls ({waited_ms}ms)".
fn parse_timeout_message(message: &str) -> Option<(u32, u64)> {
    let rest = message.split(" after ").nth(1)?;
    let (attempts, rest) = rest.split_once(" polls (")?;
    let waited = rest.strip_suffix("ms)")?;
    Some((attempts.trim().parse().ok()?, waited.trim().parse().ok()?))
}

pub type Result<T> = std::result::Result<T, VoxdubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(VoxdubError::InvalidRequest("x".into()).kind(), "invalid_request");
        assert_eq!(
            VoxdubError::JobTimedOut { attempts: 30, waited_ms: 30_000 }.kind(),
            "job_timed_out"
        );
        assert_eq!(VoxdubError::NoAudioSource.kind(), "capture");
        assert_eq!(VoxdubError::Config("bad".into()).kind(), "internal");
    }

    #[test]
    fn test_from_remote_job_failed_strips_prefix() {
        let err = VoxdubError::from_remote(
            Some("job_failed"),
            "Transcription job failed: unsupported media".into(),
        );
        match err {
            VoxdubError::JobFailed(reason) => assert_eq!(reason, "unsupported media"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_remote_timeout_keeps_budget() {
        let timed_out = VoxdubError::JobTimedOut { attempts: 30, waited_ms: 30_000 };
        let err = VoxdubError::from_remote(Some("job_timed_out"), timed_out.to_string());
        assert!(matches!(
            err,
            VoxdubError::JobTimedOut { attempts: 30, waited_ms: 30_000 }
        ));
    }

    #[test]
    fn test_from_remote_unknown_kind_is_network() {
        let err = VoxdubError::from_remote(Some("storage"), "bucket gone".into());
        assert!(matches!(err, VoxdubError::Network(m) if m == "bucket gone"));

        let err = VoxdubError::from_remote(None, "HTTP error! status: 502".into());
        assert!(matches!(err, VoxdubError::Network(_)));
    }
}
