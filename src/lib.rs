//! Rxstock Library
//!
//! Batch-level pharmacy inventory engine: expiry-aware stock allocation,
//! an append-only movement ledger and transactional order fulfillment.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Option<Arc<events::EventSender>>,
    pub services: services::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<Arc<events::EventSender>>,
    ) -> Self {
        let services = services::AppServices::new(db.clone(), event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

pub mod prelude {
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::services::AppServices;
}
