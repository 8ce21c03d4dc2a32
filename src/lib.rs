//! Partflow Library
//!
//! Transactional inventory transfer pipeline: an authoritative stock ledger
//! feeding cart reservations, warehouse holdings, downstream service and
//! cashier stations, and the sales history, with compensating paths that
//! credit quantity back to the ledger.
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
pub mod stages;

use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;

/// Shared handles the CLI and tests build services from.
#[derive(Clone)]
pub struct PipelineContext {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
}

impl PipelineContext {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
        }
    }

    pub fn stock_service(&self) -> services::stock::StockService {
        services::stock::StockService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn cart_service(&self) -> services::cart::CartService {
        services::cart::CartService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn checkout_service(&self) -> services::checkout::CheckoutService {
        services::checkout::CheckoutService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn warehouse_service(&self) -> services::warehouse::WarehouseService {
        services::warehouse::WarehouseService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn fulfillment_service(&self) -> services::fulfillment::FulfillmentService {
        services::fulfillment::FulfillmentService::new(
            self.db.clone(),
            self.event_sender.clone(),
            self.config.clone(),
        )
    }

    pub fn sales_service(&self) -> services::sales::SalesService {
        services::sales::SalesService::new(self.db.clone(), self.config.clone())
    }
}

// Common query parameters for list operations
#[derive(Deserialize, Debug, Clone)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            search: None,
            sort_by: None,
            sort_order: None,
        }
    }
}
