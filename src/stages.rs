//! Holding stages of the transfer pipeline and their row-lifecycle policy.
//!
//! Quantity moves `stock -> cart -> warehouse -> {service | cashier} -> sales`.
//! Forward consumption always deletes a row that reaches zero. What happens on
//! a compensating exit (cart removal, order cancellation, return to stock) is
//! a per-stage decision, declared once here so it can be read and tested in
//! one place instead of being rediscovered inside each operation.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Cart,
    Warehouse,
    Service,
    Cashier,
}

/// Row lifecycle for a stage's compensating exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    /// Keep the fully-consumed row, marked with its terminal status, instead
    /// of deleting it. Set exactly where quantity re-enters the ledger and an
    /// audit trail is wanted.
    pub retain_on_terminal: bool,
}

impl Stage {
    pub const fn policy(self) -> StagePolicy {
        match self {
            Stage::Cart => StagePolicy {
                retain_on_terminal: false,
            },
            // Cancellation keeps the rows as the order's audit record.
            Stage::Warehouse => StagePolicy {
                retain_on_terminal: true,
            },
            // Returns to stock keep the row, marked returned_to_stock.
            Stage::Service => StagePolicy {
                retain_on_terminal: true,
            },
            Stage::Cashier => StagePolicy {
                retain_on_terminal: false,
            },
        }
    }
}
