use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

/// A per-item shortfall reported by a failed quantity debit.
///
/// `available` is the quantity the source row actually held at the time the
/// debit was refused, so callers can surface an exact offer to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub stock_item_id: i64,
    pub requested: i64,
    pub available: i64,
}

impl std::fmt::Display for Shortage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "item {}: requested {}, available {}",
            self.stock_item_id, self.requested, self.available
        )
    }
}

fn fmt_shortages(shortages: &[Shortage]) -> String {
    shortages
        .iter()
        .map(Shortage::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid quantity: {0} (must be a positive amount)")]
    InvalidQuantity(i64),

    #[error("Insufficient stock: {}", fmt_shortages(.0))]
    InsufficientStock(Vec<Shortage>),

    #[error("Insufficient quantity in {stage}: {shortage}")]
    InsufficientQuantity {
        stage: crate::stages::Stage,
        shortage: Shortage,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Convenience constructor for wrapping string-based database errors.
    pub fn database_error_message(message: impl Into<String>) -> Self {
        ServiceError::db_error(message.into())
    }

    /// Whether retrying the whole transaction may succeed.
    ///
    /// Only transient store failures (deadlocks, lock timeouts, serialization
    /// conflicts) qualify. Domain refusals such as shortages never do: the
    /// state that produced them is committed and a retry would just re-read it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DatabaseError(err) => crate::db::is_transient_db_err(err),
            _ => false,
        }
    }

    /// Returns the error message suitable for user-facing surfaces.
    /// Store errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Every shortage carried by this error, for item-addressable reporting.
    pub fn shortages(&self) -> &[Shortage] {
        match self {
            Self::InsufficientStock(shortages) => shortages,
            Self::InsufficientQuantity { shortage, .. } => std::slice::from_ref(shortage),
            _ => &[],
        }
    }

    /// Stable label for failure counters.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::InsufficientQuantity { .. } => "insufficient_quantity",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::EventError(_) => "event_error",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) => "internal_error",
            Self::Other(_) => "other",
        }
    }
}

// Result extensions for easier error handling
pub trait ResultExt<T> {
    fn map_err_to_service(self) -> Result<T, ServiceError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ServiceError>,
{
    fn map_err_to_service(self) -> Result<T, ServiceError> {
        self.map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Stage;

    #[test]
    fn shortage_rendering_names_the_item() {
        let err = ServiceError::InsufficientStock(vec![
            Shortage {
                stock_item_id: 7,
                requested: 5,
                available: 2,
            },
            Shortage {
                stock_item_id: 9,
                requested: 1,
                available: 0,
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("item 7: requested 5, available 2"));
        assert!(message.contains("item 9: requested 1, available 0"));
        assert_eq!(err.shortages().len(), 2);
    }

    #[test]
    fn holding_stage_shortage_names_the_stage() {
        let err = ServiceError::InsufficientQuantity {
            stage: Stage::Warehouse,
            shortage: Shortage {
                stock_item_id: 3,
                requested: 4,
                available: 1,
            },
        };
        assert!(err.to_string().contains("warehouse"));
        assert_eq!(err.shortages().len(), 1);
    }

    #[test]
    fn response_message_hides_store_details() {
        let err = ServiceError::db_error("connection reset by peer");
        assert_eq!(err.response_message(), "Database error");

        let err = ServiceError::NotFound("stock item 42".into());
        assert_eq!(err.response_message(), "Not found: stock item 42");
    }

    #[test]
    fn domain_refusals_are_not_retryable() {
        assert!(!ServiceError::InvalidQuantity(0).is_retryable());
        assert!(!ServiceError::NotFound("x".into()).is_retryable());
        assert!(ServiceError::db_error("deadlock detected").is_retryable());
        assert!(!ServiceError::db_error("syntax error").is_retryable());
    }
}
