//! Persistent model of the pipeline: one module per table.
//!
//! Quantity lives in exactly one of these tables at any moment; every move
//! between them happens inside a transaction through the guarded primitives
//! in [`crate::db::guard`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod cart_reservation;
pub mod cashier_entry;
pub mod sales_record;
pub mod service_entry;
pub mod stock_item;
pub mod warehouse_entry;

/// Status of a holding row in the warehouse, service, or cashier stage.
///
/// `pending` rows hold live quantity and count toward conservation. The
/// terminal statuses mark retained audit rows whose quantity has already
/// been credited back to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "returned_to_stock")]
    ReturnedToStock,
}
