use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{AudioBatch, VoiceSelection};

/// Turns one audio batch into synthesized speech.
///
/// Implemented by the HTTP submission client (remote mode) and by the
/// server-side orchestrator (in-process mode).
#[async_trait]
pub trait RemoteProcessor: Send + Sync {
    async fn process(&self, batch: &AudioBatch, selection: &VoiceSelection) -> Result<Bytes>;
}
