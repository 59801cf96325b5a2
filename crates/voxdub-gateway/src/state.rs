//! Shared gateway state.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use voxdub_core::config::{Config, ResponseEncoding};
use voxdub_processor::store::{FsObjectStore, MemoryObjectStore};
use voxdub_processor::{ObjectStore, Orchestrator, build_orchestrator};

pub struct GatewayState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub encoding: ResponseEncoding,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        let encoding = config.response_encoding();
        Self {
            config,
            orchestrator,
            encoding,
            started_at: Instant::now(),
        }
    }

    /// Wire the production services from config. `in_memory` keeps transient
    /// objects in process memory instead of `processor.storage_dir`.
    pub fn from_config(config: Config, in_memory: bool) -> Self {
        let store: Arc<dyn ObjectStore> = if in_memory {
            info!("Using in-memory object store");
            Arc::new(MemoryObjectStore::new())
        } else {
            let dir = config.storage_dir();
            info!(dir = %dir.display(), "Using filesystem object store");
            Arc::new(FsObjectStore::new(dir))
        };
        let orchestrator = Arc::new(build_orchestrator(&config.processor(), store));
        Self::new(config, orchestrator)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
