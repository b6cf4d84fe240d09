//! Datatrail
//!
//! Change capture, field-level diffing, and retention enforcement for mutable
//! record stores. Every create/update/delete against a monitored entity is
//! captured as an immutable audit record with a precise field-level diff;
//! declarative retention policies periodically purge or anonymize aged data;
//! on-demand compliance operations export or anonymize a single record.

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::{DbPool, EntityStore};
pub use utils::{EngineError, EngineResult};

/// Engine state shared across services
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// The monitored record store the engine sweeps and exports from
    pub entities: Arc<dyn EntityStore>,
}
