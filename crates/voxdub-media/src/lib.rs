//! Client dubbing pipeline: capture, batching, single-flight submission,
//! resynchronized playback.

pub mod batcher;
pub mod capture;
pub mod client;
pub mod file_source;
pub mod notify;
pub mod pipeline;
pub mod player;
pub mod queue;

pub use batcher::Batcher;
pub use capture::{AudioTrack, ChunkCapturer, LiveSource};
pub use client::HttpRemoteProcessor;
pub use file_source::FileLiveSource;
pub use notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use pipeline::DubbingPipeline;
pub use player::{FileSinkBackend, PlayableAudio, PlaybackBackend, PlaybackHandle, Player};
pub use queue::{SubmissionQueue, SubmissionWorker, WorkerStats};
