//! Shared daemon state handed to every request handler.

use std::sync::Arc;

use ctrldot_core::DecisionService;
use ctrldot_core::config::Config;
use ctrldot_core::ledger::autobundle::AutobundleManager;

/// State shared by all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The decision service.
    pub service: Arc<DecisionService>,
    /// The autobundle manager, when configured.
    pub autobundle: Option<Arc<AutobundleManager>>,
    /// The loaded configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Bundles the service, autobundle manager, and config for the router.
    #[must_use]
    pub fn new(
        service: Arc<DecisionService>,
        autobundle: Option<Arc<AutobundleManager>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            service,
            autobundle,
            config,
        }
    }
}
