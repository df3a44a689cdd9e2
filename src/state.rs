//! Shared application state for all routes.

use crate::config::Settings;
use crate::events::EventBus;
use crate::io::DataLayer;
use crate::resource::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub data: Arc<dyn DataLayer>,
    /// Frozen once the app is built; subscriptions happen on the builder.
    pub events: Arc<EventBus>,
    pub registry: Arc<Registry>,
}
