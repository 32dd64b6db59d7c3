//! Server state

use std::sync::Arc;

use crate::actions::self_heal::SelfHealer;
use crate::heartbeat::scheduler::HeartbeatScheduler;
use crate::providers::manager::ProviderManager;
use crate::storage::memory::Storage;

/// Server state shared across handlers
pub struct ServerState {
    pub version: String,
    pub manager: Arc<ProviderManager>,
    pub scheduler: Arc<HeartbeatScheduler>,
    pub healer: Arc<SelfHealer>,
    pub storage: Arc<dyn Storage>,
}

impl ServerState {
    pub fn new(
        version: String,
        manager: Arc<ProviderManager>,
        scheduler: Arc<HeartbeatScheduler>,
        healer: Arc<SelfHealer>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            version,
            manager,
            scheduler,
            healer,
            storage,
        }
    }
}
