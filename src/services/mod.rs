//! Pipeline services.
//!
//! Each stage of the transfer pipeline has one service: the stock ledger,
//! the cart, checkout, the warehouse, downstream fulfillment (service and
//! cashier stations), and the sales history. Every mutation runs inside a
//! retried transaction and moves quantity through the guarded primitives
//! in [`crate::db::guard`].

use serde::Serialize;

// Stock ledger and catalog
pub mod stock;

// Cart reservations
pub mod cart;

// Cart to warehouse
pub mod checkout;

// Warehouse holdings and cancellation
pub mod warehouse;

// Service station, cashier, payment
pub mod fulfillment;

// Sales history and reporting
pub mod sales;

/// One page of a listing, with enough metadata to render pagination.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}
