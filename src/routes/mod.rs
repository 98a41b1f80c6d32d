//! The HTTP surface this service owns: health/readiness, metrics, and
//! the single inbound callback subscribers use to report delivery
//! outcomes. Everything else (creating transactions, admin operations)
//! is reached through `AdminFacade` by an external caller, not routed
//! here.

pub mod health;
pub mod webhooks;

use std::sync::Arc;

use crate::admin::AdminFacade;
use crate::config::AppConfig;
use crate::db::Database;
use crate::workerpool::BoundedPool;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: AppConfig,
    pub admin: Arc<AdminFacade>,
    pub default_pool: Arc<BoundedPool>,
}
