use crate::{
    config::AppConfig,
    db::{guard, transaction_with_retries, DbPool},
    entities::{
        cashier_entry::{self, Entity as CashierEntry},
        sales_record,
        service_entry::{self, Entity as ServiceEntry},
        stock_item::{self, Entity as StockItem},
        EntryStatus,
    },
    errors::{ServiceError, Shortage},
    events::{Event, EventSender},
    services::warehouse::{upsert_cashier_line, Consumer, RoutedBatch},
    stages::Stage,
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

lazy_static! {
    static ref SERVICE_ROUTINGS: IntCounter = IntCounter::new(
        "service_cashier_routings_total",
        "Total number of service to cashier moves"
    )
    .expect("metric can be created");
    static ref SERVICE_RETURNS: IntCounter = IntCounter::new(
        "service_returns_total",
        "Total number of service returns to stock"
    )
    .expect("metric can be created");
    static ref PAYMENTS: IntCounter = IntCounter::new(
        "payments_recorded_total",
        "Total number of recorded payments"
    )
    .expect("metric can be created");
    static ref FULFILLMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "fulfillment_failures_total",
            "Total number of failed fulfillment operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_entry_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CashierLine {
    pub cashier_entry_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInput {
    pub lines: Vec<CashierLine>,
    pub payment_method: String,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnedToStock {
    pub order_id: String,
    pub lines: usize,
    pub quantity: i64,
}

/// Fulfillment service for the downstream stages: moves quantity from the
/// service station to the cashier, sends unused service quantity back to
/// the ledger, and records payment as the pipeline's terminal step.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl FulfillmentService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Moves service lines of one order to the cashier, all-or-nothing.
    #[instrument(skip(self, lines), fields(order_id = %order_id, line_count = lines.len()))]
    pub async fn service_to_cashier(
        &self,
        order_id: &str,
        lines: Vec<ServiceLine>,
    ) -> Result<RoutedBatch, ServiceError> {
        if lines.is_empty() {
            FULFILLMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Routing requires at least one line".to_string(),
            ));
        }
        for line in &lines {
            if line.quantity <= 0 {
                FULFILLMENT_FAILURES
                    .with_label_values(&["invalid_quantity"])
                    .inc();
                return Err(ServiceError::InvalidQuantity(line.quantity));
            }
        }

        let order_id = order_id.to_string();
        let order_id_for_txn = order_id.clone();

        let (line_count, quantity) = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "service_to_cashier",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let mut lines = lines.clone();
                Box::pin(async move {
                    lines.sort_by_key(|l| l.service_entry_id);

                    let mut total = 0i64;
                    for line in &lines {
                        let entry = load_pending_service_entry(
                            txn,
                            &order_id,
                            line.service_entry_id,
                        )
                        .await?;

                        let row = Condition::all()
                            .add(service_entry::Column::Id.eq(line.service_entry_id))
                            .add(service_entry::Column::Status.eq(EntryStatus::Pending));

                        let debited = guard::debit::<service_entry::Entity, _>(
                            txn,
                            service_entry::Column::Quantity,
                            row.clone(),
                            line.quantity,
                            vec![],
                        )
                        .await?;
                        if !debited {
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Service,
                                shortage: Shortage {
                                    stock_item_id: entry.stock_item_id,
                                    requested: line.quantity,
                                    available: entry.quantity,
                                },
                            });
                        }
                        guard::delete_if_empty::<service_entry::Entity, _>(
                            txn,
                            service_entry::Column::Quantity,
                            row,
                        )
                        .await?;

                        upsert_cashier_line(
                            txn,
                            &order_id,
                            entry.stock_item_id,
                            &entry.part_number,
                            entry.unit_price,
                            line.quantity,
                        )
                        .await?;

                        total += line.quantity;
                    }

                    Ok((lines.len(), total))
                })
            },
        )
        .await
        .map_err(|e| {
            FULFILLMENT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        SERVICE_ROUTINGS.inc();
        self.event_sender
            .send_or_log(Event::ServiceRoutedToCashier {
                order_id: order_id.clone(),
                line_count,
            })
            .await;

        info!(
            "Moved {} lines ({} units) of order {} from service to cashier",
            line_count, quantity, order_id
        );
        Ok(RoutedBatch {
            order_id,
            consumer: Consumer::Cashier,
            lines: line_count,
            quantity,
        })
    }

    /// Returns unused service quantity to the stock ledger, all-or-nothing.
    ///
    /// A fully returned line is retained with status `returned_to_stock`
    /// and its original quantity for audit display; a partial return debits
    /// the line in place. Either way the returned amount is credited back
    /// to `available`, bounded by `total_quantity`.
    #[instrument(skip(self, lines), fields(order_id = %order_id, line_count = lines.len()))]
    pub async fn service_return_to_stock(
        &self,
        order_id: &str,
        lines: Vec<ServiceLine>,
    ) -> Result<ReturnedToStock, ServiceError> {
        if lines.is_empty() {
            FULFILLMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Return requires at least one line".to_string(),
            ));
        }
        for line in &lines {
            if line.quantity <= 0 {
                FULFILLMENT_FAILURES
                    .with_label_values(&["invalid_quantity"])
                    .inc();
                return Err(ServiceError::InvalidQuantity(line.quantity));
            }
        }

        let order_id = order_id.to_string();
        let order_id_for_txn = order_id.clone();

        let (line_count, quantity) = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "service_return_to_stock",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let mut lines = lines.clone();
                Box::pin(async move {
                    lines.sort_by_key(|l| l.service_entry_id);

                    let now = Utc::now();
                    let mut total = 0i64;
                    for line in &lines {
                        let entry = load_pending_service_entry(
                            txn,
                            &order_id,
                            line.service_entry_id,
                        )
                        .await?;
                        if line.quantity > entry.quantity {
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Service,
                                shortage: Shortage {
                                    stock_item_id: entry.stock_item_id,
                                    requested: line.quantity,
                                    available: entry.quantity,
                                },
                            });
                        }

                        if line.quantity == entry.quantity {
                            // Full return consumes the line: retained as an
                            // audit row when the stage policy says so.
                            let row = Condition::all()
                                .add(service_entry::Column::Id.eq(entry.id))
                                .add(service_entry::Column::Status.eq(EntryStatus::Pending))
                                .add(service_entry::Column::Quantity.eq(line.quantity));
                            let settled = if Stage::Service.policy().retain_on_terminal {
                                guard::mark::<service_entry::Entity, _>(
                                    txn,
                                    row,
                                    vec![
                                        (
                                            service_entry::Column::Status,
                                            Expr::value(EntryStatus::ReturnedToStock),
                                        ),
                                        (service_entry::Column::ReturnedAt, Expr::value(now)),
                                    ],
                                )
                                .await?
                            } else {
                                ServiceEntry::delete_many()
                                    .filter(row)
                                    .exec(txn)
                                    .await?
                                    .rows_affected
                                    > 0
                            };
                            if !settled {
                                return Err(ServiceError::Conflict(format!(
                                    "Service entry {} changed during return",
                                    entry.id
                                )));
                            }
                        } else {
                            let row = Condition::all()
                                .add(service_entry::Column::Id.eq(entry.id))
                                .add(service_entry::Column::Status.eq(EntryStatus::Pending));
                            let debited = guard::debit::<service_entry::Entity, _>(
                                txn,
                                service_entry::Column::Quantity,
                                row,
                                line.quantity,
                                vec![],
                            )
                            .await?;
                            if !debited {
                                return Err(ServiceError::InsufficientQuantity {
                                    stage: Stage::Service,
                                    shortage: Shortage {
                                        stock_item_id: entry.stock_item_id,
                                        requested: line.quantity,
                                        available: entry.quantity,
                                    },
                                });
                            }
                        }

                        let credited = guard::credit::<stock_item::Entity, _>(
                            txn,
                            stock_item::Column::Available,
                            Condition::all().add(stock_item::Column::Id.eq(entry.stock_item_id)),
                            line.quantity,
                            Some(stock_item::Column::TotalQuantity),
                            vec![],
                        )
                        .await?;
                        if !credited {
                            if StockItem::find_by_id(entry.stock_item_id)
                                .one(txn)
                                .await?
                                .is_none()
                            {
                                return Err(ServiceError::NotFound(format!(
                                    "Stock item {} not found",
                                    entry.stock_item_id
                                )));
                            }
                            return Err(ServiceError::Conflict(format!(
                                "Stock item {} cannot absorb {} returned units",
                                entry.stock_item_id, line.quantity
                            )));
                        }

                        total += line.quantity;
                    }

                    Ok((lines.len(), total))
                })
            },
        )
        .await
        .map_err(|e| {
            FULFILLMENT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        SERVICE_RETURNS.inc();
        self.event_sender
            .send_or_log(Event::ServiceReturnedToStock {
                order_id: order_id.clone(),
                quantity,
            })
            .await;

        info!(
            "Returned {} units across {} lines of order {} to stock",
            quantity, line_count, order_id
        );
        Ok(ReturnedToStock {
            order_id,
            lines: line_count,
            quantity,
        })
    }

    /// Records payment for cashier lines and writes the sales history,
    /// all-or-nothing.
    ///
    /// The caller's `total_amount` is authoritative and is allocated across
    /// the batch proportionally to line value; a single-line payment
    /// records the exact total. Consumed cashier rows are deleted at zero.
    #[instrument(skip(self, input), fields(order_id = %order_id, line_count = input.lines.len()))]
    pub async fn process_payment(
        &self,
        order_id: &str,
        input: PaymentInput,
    ) -> Result<Vec<sales_record::Model>, ServiceError> {
        if input.lines.is_empty() {
            FULFILLMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Payment requires at least one line".to_string(),
            ));
        }
        for line in &input.lines {
            if line.quantity <= 0 {
                FULFILLMENT_FAILURES
                    .with_label_values(&["invalid_quantity"])
                    .inc();
                return Err(ServiceError::InvalidQuantity(line.quantity));
            }
        }
        if input.total_amount <= Decimal::ZERO {
            FULFILLMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Payment total must be positive".to_string(),
            ));
        }
        if input.payment_method.trim().is_empty() {
            FULFILLMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Payment method must not be empty".to_string(),
            ));
        }

        let order_id = order_id.to_string();
        let order_id_for_txn = order_id.clone();
        let total_amount = input.total_amount;
        let payment_method = input.payment_method.trim().to_string();
        let method_for_txn = payment_method.clone();
        let mut lines = input.lines;
        lines.sort_by_key(|l| l.cashier_entry_id);

        let records = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "process_payment",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let payment_method = method_for_txn.clone();
                let lines = lines.clone();
                Box::pin(async move {
                    let mut entries = Vec::with_capacity(lines.len());
                    for line in &lines {
                        let entry = CashierEntry::find_by_id(line.cashier_entry_id)
                            .one(txn)
                            .await?
                            .filter(|e| e.order_id == order_id)
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Cashier entry {} not found for order {}",
                                    line.cashier_entry_id, order_id
                                ))
                            })?;
                        if entry.status != EntryStatus::Pending {
                            return Err(ServiceError::InvalidOperation(format!(
                                "Cashier entry {} is not pending",
                                entry.id
                            )));
                        }
                        if line.quantity > entry.quantity {
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Cashier,
                                shortage: Shortage {
                                    stock_item_id: entry.stock_item_id,
                                    requested: line.quantity,
                                    available: entry.quantity,
                                },
                            });
                        }
                        entries.push((entry, line.quantity));
                    }

                    let values: Vec<Decimal> = entries
                        .iter()
                        .map(|(entry, qty)| entry.unit_price * Decimal::from(*qty))
                        .collect();
                    let amounts = allocate(total_amount, &values);

                    let now = Utc::now();
                    let mut records = Vec::with_capacity(entries.len());
                    for ((entry, qty), amount) in entries.into_iter().zip(amounts) {
                        let row = Condition::all()
                            .add(cashier_entry::Column::Id.eq(entry.id))
                            .add(cashier_entry::Column::Status.eq(EntryStatus::Pending));

                        let debited = guard::debit::<cashier_entry::Entity, _>(
                            txn,
                            cashier_entry::Column::Quantity,
                            row.clone(),
                            qty,
                            vec![],
                        )
                        .await?;
                        if !debited {
                            let available = CashierEntry::find_by_id(entry.id)
                                .one(txn)
                                .await?
                                .map(|e| e.quantity)
                                .unwrap_or(0);
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Cashier,
                                shortage: Shortage {
                                    stock_item_id: entry.stock_item_id,
                                    requested: qty,
                                    available,
                                },
                            });
                        }
                        guard::delete_if_empty::<cashier_entry::Entity, _>(
                            txn,
                            cashier_entry::Column::Quantity,
                            row,
                        )
                        .await?;

                        let brand = StockItem::find_by_id(entry.stock_item_id)
                            .one(txn)
                            .await?
                            .map(|item| item.brand)
                            .unwrap_or_default();

                        let record = sales_record::ActiveModel {
                            order_id: Set(order_id.clone()),
                            stock_item_id: Set(entry.stock_item_id),
                            quantity: Set(qty),
                            part_number: Set(entry.part_number.clone()),
                            brand: Set(brand),
                            unit_price: Set(entry.unit_price),
                            total_amount: Set(amount),
                            payment_method: Set(payment_method.clone()),
                            sold_at: Set(now),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?;
                        records.push(record);
                    }

                    Ok(records)
                })
            },
        )
        .await
        .map_err(|e| {
            FULFILLMENT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        PAYMENTS.inc();
        self.event_sender
            .send_or_log(Event::PaymentRecorded {
                order_id: order_id.clone(),
                total_amount,
                payment_method,
            })
            .await;

        info!(
            "Recorded payment of {} for order {} across {} lines",
            total_amount,
            order_id,
            records.len()
        );
        Ok(records)
    }
}

async fn load_pending_service_entry<C: sea_orm::ConnectionTrait>(
    txn: &C,
    order_id: &str,
    service_entry_id: i64,
) -> Result<service_entry::Model, ServiceError> {
    let entry = ServiceEntry::find_by_id(service_entry_id)
        .one(txn)
        .await?
        .filter(|e| e.order_id == order_id)
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Service entry {} not found for order {}",
                service_entry_id, order_id
            ))
        })?;
    if entry.status != EntryStatus::Pending {
        return Err(ServiceError::InvalidOperation(format!(
            "Service entry {} is not pending",
            entry.id
        )));
    }
    Ok(entry)
}

/// Splits `total` across lines proportionally to line value. The rounding
/// remainder folds into the last line so the parts always sum exactly to
/// `total`; a single line gets the total verbatim. Zero-value batches split
/// evenly.
fn allocate(total: Decimal, values: &[Decimal]) -> Vec<Decimal> {
    if values.is_empty() {
        return Vec::new();
    }
    if values.len() == 1 {
        return vec![total];
    }

    let value_sum: Decimal = values.iter().copied().sum();
    let count = Decimal::from(values.len() as i64);

    let mut allocated = Vec::with_capacity(values.len());
    let mut rest = total;
    for value in &values[..values.len() - 1] {
        let share = if value_sum.is_zero() {
            (total / count).round_dp(2)
        } else {
            (total * *value / value_sum).round_dp(2)
        };
        allocated.push(share);
        rest -= share;
    }
    allocated.push(rest);
    allocated
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn single_line_gets_exact_total() {
        let parts = allocate(dec!(100), &[dec!(37.50)]);
        assert_eq!(parts, vec![dec!(100)]);
    }

    #[test]
    fn allocation_is_proportional() {
        let parts = allocate(dec!(100), &[dec!(75), dec!(25)]);
        assert_eq!(parts, vec![dec!(75.00), dec!(25.00)]);
    }

    #[test]
    fn remainder_lands_on_last_line() {
        let parts = allocate(dec!(100), &[dec!(1), dec!(1), dec!(1)]);
        assert_eq!(parts, vec![dec!(33.33), dec!(33.33), dec!(33.34)]);
        let sum: Decimal = parts.iter().copied().sum();
        assert_eq!(sum, dec!(100));
    }

    #[test]
    fn zero_value_batch_splits_evenly() {
        let parts = allocate(dec!(10), &[Decimal::ZERO, Decimal::ZERO]);
        assert_eq!(parts, vec![dec!(5.00), dec!(5.00)]);
    }

    proptest! {
        #[test]
        fn allocation_preserves_total(
            total_cents in 1i64..10_000_000,
            line_cents in proptest::collection::vec(0i64..1_000_000, 1..8),
        ) {
            let total = Decimal::new(total_cents, 2);
            let values: Vec<Decimal> =
                line_cents.into_iter().map(|c| Decimal::new(c, 2)).collect();

            let parts = allocate(total, &values);

            prop_assert_eq!(parts.len(), values.len());
            let sum: Decimal = parts.iter().copied().sum();
            prop_assert_eq!(sum, total);
        }
    }
}
