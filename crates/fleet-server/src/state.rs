use std::sync::Arc;

use blackboard::Blackboard;
use persistence::Database;
use worker_manager::WorkerManager;

use crate::auth::TokenStore;
use crate::config::Settings;

/// Everything the route handlers need, cheap to clone (an `Arc` behind
/// each field) so `axum` can hand a fresh copy to every request.
#[derive(Clone)]
pub struct AppState {
    pub settings: &'static Settings,
    pub workers: Arc<WorkerManager>,
    pub blackboard: Option<Arc<Blackboard>>,
    pub db: Option<Database>,
    pub tokens: Arc<TokenStore>,
}

impl AppState {
    pub async fn health(&self) -> bool {
        match &self.db {
            Some(db) => db.health_check().await.is_ok(),
            None => true,
        }
    }
}
