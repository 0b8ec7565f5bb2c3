//! Shared application state passed to all API handlers.

use std::sync::Arc;

use tether_engine::{RunExecutor, SessionExecutor};
use tether_store::Store;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub runs: Arc<RunExecutor>,
    pub sessions: Arc<SessionExecutor>,
}
