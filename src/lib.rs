pub mod config;
pub mod datum;
pub mod error;
pub mod expr;
pub mod handlers;
pub mod json;
pub mod matcher;
pub mod object;
pub mod query;
pub mod store;

use std::sync::Arc;

use config::SysDbConfig;
use store::Store;

/// Shared handlers state: one store behind an `Arc`, the way the teacher's
/// `AppState` wraps its `clickhouse::Client`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<SysDbConfig>,
}
