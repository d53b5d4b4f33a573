//! Shared application state handed to every axum handler.

use std::sync::Arc;

use sa_broadcaster::Broadcaster;
use sa_domain::config::Config;
use sa_engine::{CancelMap, EngineServices};
use sa_sessions::SessionStore;

use crate::auth::AuthState;
use crate::tasks::TaskCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub services: Arc<EngineServices>,
    pub cancels: Arc<CancelMap>,
    pub coordinator: Arc<TaskCoordinator>,
    pub auth: Option<AuthState>,
}
