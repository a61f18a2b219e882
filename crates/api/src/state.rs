use std::sync::Arc;

use relay_core::broker::JobBroker;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the broker wraps an `Arc`'d store.
#[derive(Clone)]
pub struct AppState {
    pub broker: JobBroker,
    pub config: Arc<ServerConfig>,
}
