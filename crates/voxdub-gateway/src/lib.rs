//! HTTP gateway exposing the audio re-dubbing endpoint.
//!
//! `POST /process-audio` accepts one multipart batch, drives it through the
//! [`voxdub_processor::Orchestrator`], and answers with synthesized audio.

pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;
