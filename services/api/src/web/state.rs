//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use companion_core::conversation::ConversationManager;
use companion_core::ports::AssetStore;
use companion_core::provisioning::PartnerProvisioner;

use crate::config::Config;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn AssetStore>,
    pub conversations: ConversationManager,
    pub provisioner: Arc<PartnerProvisioner>,
}
