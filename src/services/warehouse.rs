use crate::{
    config::AppConfig,
    db::{guard, transaction_with_retries, DbPool},
    entities::{
        cashier_entry, service_entry, stock_item,
        warehouse_entry::{self, Entity as WarehouseEntry},
        EntryStatus,
    },
    errors::{ServiceError, Shortage},
    events::{Event, EventSender},
    stages::Stage,
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

lazy_static! {
    static ref ORDER_ROUTINGS: IntCounter = IntCounter::new(
        "order_routings_total",
        "Total number of warehouse routing operations"
    )
    .expect("metric can be created");
    static ref ORDER_CANCELLATIONS: IntCounter = IntCounter::new(
        "order_cancellations_total",
        "Total number of order cancellations"
    )
    .expect("metric can be created");
    static ref WAREHOUSE_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "warehouse_operation_failures_total",
            "Total number of failed warehouse operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Where a warehouse line is routed to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Consumer {
    Service,
    Cashier,
}

impl Consumer {
    pub fn stage(self) -> Stage {
        match self {
            Consumer::Service => Stage::Service,
            Consumer::Cashier => Stage::Cashier,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteLine {
    pub warehouse_entry_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutedBatch {
    pub order_id: String,
    pub consumer: Consumer,
    pub lines: usize,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledOrder {
    pub order_id: String,
    pub lines_returned: usize,
    pub quantity_restocked: i64,
}

/// Warehouse service: moves held order lines downstream to the service or
/// cashier station, and cancels orders back into the ledger.
#[derive(Clone)]
pub struct WarehouseService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl WarehouseService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Routes warehouse lines of one order to a consumer stage,
    /// all-or-nothing.
    ///
    /// Each line is debited from its pending warehouse entry (deleted at
    /// zero) and summed into the consumer table on (order, item), carrying
    /// the snapshot columns forward.
    #[instrument(skip(self, lines), fields(order_id = %order_id, line_count = lines.len()))]
    pub async fn route_to_consumer(
        &self,
        order_id: &str,
        consumer: Consumer,
        lines: Vec<RouteLine>,
    ) -> Result<RoutedBatch, ServiceError> {
        if lines.is_empty() {
            WAREHOUSE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Routing requires at least one line".to_string(),
            ));
        }
        for line in &lines {
            if line.quantity <= 0 {
                WAREHOUSE_FAILURES
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
            "route_to_consumer",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let mut lines = lines.clone();
                Box::pin(async move {
                    // Entry-id order keeps row lock acquisition consistent
                    // across concurrent routings of the same order.
                    lines.sort_by_key(|l| l.warehouse_entry_id);

                    let mut total = 0i64;
                    for line in &lines {
                        let entry = WarehouseEntry::find_by_id(line.warehouse_entry_id)
                            .one(txn)
                            .await?
                            .filter(|e| e.order_id == order_id)
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Warehouse entry {} not found for order {}",
                                    line.warehouse_entry_id, order_id
                                ))
                            })?;
                        if entry.status != EntryStatus::Pending {
                            return Err(ServiceError::InvalidOperation(format!(
                                "Warehouse entry {} is not pending",
                                entry.id
                            )));
                        }

                        let row = Condition::all()
                            .add(warehouse_entry::Column::Id.eq(line.warehouse_entry_id))
                            .add(warehouse_entry::Column::Status.eq(EntryStatus::Pending));

                        let debited = guard::debit::<warehouse_entry::Entity, _>(
                            txn,
                            warehouse_entry::Column::Quantity,
                            row.clone(),
                            line.quantity,
                            vec![],
                        )
                        .await?;
                        if !debited {
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Warehouse,
                                shortage: Shortage {
                                    stock_item_id: entry.stock_item_id,
                                    requested: line.quantity,
                                    available: entry.quantity,
                                },
                            });
                        }
                        guard::delete_if_empty::<warehouse_entry::Entity, _>(
                            txn,
                            warehouse_entry::Column::Quantity,
                            row,
                        )
                        .await?;

                        match consumer {
                            Consumer::Service => {
                                upsert_service_line(
                                    txn,
                                    &order_id,
                                    entry.stock_item_id,
                                    &entry.part_number,
                                    entry.unit_price,
                                    line.quantity,
                                )
                                .await?;
                            }
                            Consumer::Cashier => {
                                upsert_cashier_line(
                                    txn,
                                    &order_id,
                                    entry.stock_item_id,
                                    &entry.part_number,
                                    entry.unit_price,
                                    line.quantity,
                                )
                                .await?;
                            }
                        }

                        total += line.quantity;
                    }

                    Ok((lines.len(), total))
                })
            },
        )
        .await
        .map_err(|e| {
            WAREHOUSE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        ORDER_ROUTINGS.inc();
        self.event_sender
            .send_or_log(Event::OrderRouted {
                order_id: order_id.clone(),
                consumer: consumer.stage(),
                line_count,
            })
            .await;

        info!(
            "Routed {} lines ({} units) of order {} to {}",
            line_count, quantity, order_id, consumer
        );
        Ok(RoutedBatch {
            order_id,
            consumer,
            lines: line_count,
            quantity,
        })
    }

    /// Cancels every pending warehouse line of an order, crediting the full
    /// quantities back to the ledger.
    ///
    /// Cancellation applies only at the warehouse stage; quantity already
    /// routed downstream goes back through the service return path. The
    /// cancelled rows are retained as the order's audit record, marked
    /// `returned` with the reason and timestamp. A second cancellation
    /// finds no pending rows and fails with `NotFound`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: &str,
        reason: Option<String>,
    ) -> Result<CancelledOrder, ServiceError> {
        let order_id = order_id.to_string();
        let order_id_for_txn = order_id.clone();
        let reason_for_event = reason.clone();

        let (lines_returned, quantity_restocked) = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "cancel_order",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    let pending = WarehouseEntry::find()
                        .filter(warehouse_entry::Column::OrderId.eq(order_id.clone()))
                        .filter(warehouse_entry::Column::Status.eq(EntryStatus::Pending))
                        .order_by_asc(warehouse_entry::Column::Id)
                        .all(txn)
                        .await?;
                    if pending.is_empty() {
                        return Err(ServiceError::NotFound(format!(
                            "No pending warehouse entries for order {}",
                            order_id
                        )));
                    }

                    let now = Utc::now();
                    let mut restocked = 0i64;
                    for entry in &pending {
                        let row = Condition::all()
                            .add(warehouse_entry::Column::Id.eq(entry.id))
                            .add(warehouse_entry::Column::Status.eq(EntryStatus::Pending));

                        let settled = if Stage::Warehouse.policy().retain_on_terminal {
                            guard::mark::<warehouse_entry::Entity, _>(
                                txn,
                                row,
                                vec![
                                    (
                                        warehouse_entry::Column::Status,
                                        Expr::value(EntryStatus::Returned),
                                    ),
                                    (
                                        warehouse_entry::Column::ReturnReason,
                                        Expr::value(reason.clone()),
                                    ),
                                    (warehouse_entry::Column::ReturnedAt, Expr::value(now)),
                                ],
                            )
                            .await?
                        } else {
                            WarehouseEntry::delete_many()
                                .filter(row)
                                .exec(txn)
                                .await?
                                .rows_affected
                                > 0
                        };
                        if !settled {
                            return Err(ServiceError::Conflict(format!(
                                "Warehouse entry {} changed during cancellation",
                                entry.id
                            )));
                        }

                        let credited = guard::credit::<stock_item::Entity, _>(
                            txn,
                            stock_item::Column::Available,
                            Condition::all().add(stock_item::Column::Id.eq(entry.stock_item_id)),
                            entry.quantity,
                            Some(stock_item::Column::TotalQuantity),
                            vec![],
                        )
                        .await?;
                        if !credited {
                            return Err(ServiceError::Conflict(format!(
                                "Stock item {} cannot absorb {} returned units",
                                entry.stock_item_id, entry.quantity
                            )));
                        }

                        restocked += entry.quantity;
                    }

                    Ok((pending.len(), restocked))
                })
            },
        )
        .await
        .map_err(|e| {
            WAREHOUSE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        ORDER_CANCELLATIONS.inc();
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id: order_id.clone(),
                reason: reason_for_event,
                quantity_restocked,
            })
            .await;

        info!(
            "Cancelled order {}: {} lines, {} units restocked",
            order_id, lines_returned, quantity_restocked
        );
        Ok(CancelledOrder {
            order_id,
            lines_returned,
            quantity_restocked,
        })
    }

    /// Every warehouse entry of an order, pending and retained alike.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: &str,
    ) -> Result<Vec<warehouse_entry::Model>, ServiceError> {
        let entries = WarehouseEntry::find()
            .filter(warehouse_entry::Column::OrderId.eq(order_id))
            .order_by_asc(warehouse_entry::Column::Id)
            .all(self.db.as_ref())
            .await?;
        if entries.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }
        Ok(entries)
    }
}

/// Sums `quantity` into the pending service line for (order, item), or
/// creates it with the snapshot carried forward.
pub(crate) async fn upsert_service_line<C: ConnectionTrait>(
    txn: &C,
    order_id: &str,
    stock_item_id: i64,
    part_number: &str,
    unit_price: Decimal,
    quantity: i64,
) -> Result<(), ServiceError> {
    let credited = guard::credit::<service_entry::Entity, _>(
        txn,
        service_entry::Column::Quantity,
        Condition::all()
            .add(service_entry::Column::OrderId.eq(order_id))
            .add(service_entry::Column::StockItemId.eq(stock_item_id))
            .add(service_entry::Column::Status.eq(EntryStatus::Pending)),
        quantity,
        None,
        vec![],
    )
    .await?;
    if !credited {
        service_entry::ActiveModel {
            order_id: Set(order_id.to_string()),
            stock_item_id: Set(stock_item_id),
            quantity: Set(quantity),
            part_number: Set(part_number.to_string()),
            unit_price: Set(unit_price),
            status: Set(EntryStatus::Pending),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}

/// Same summing upsert for the cashier table.
pub(crate) async fn upsert_cashier_line<C: ConnectionTrait>(
    txn: &C,
    order_id: &str,
    stock_item_id: i64,
    part_number: &str,
    unit_price: Decimal,
    quantity: i64,
) -> Result<(), ServiceError> {
    let credited = guard::credit::<cashier_entry::Entity, _>(
        txn,
        cashier_entry::Column::Quantity,
        Condition::all()
            .add(cashier_entry::Column::OrderId.eq(order_id))
            .add(cashier_entry::Column::StockItemId.eq(stock_item_id))
            .add(cashier_entry::Column::Status.eq(EntryStatus::Pending)),
        quantity,
        None,
        vec![],
    )
    .await?;
    if !credited {
        cashier_entry::ActiveModel {
            order_id: Set(order_id.to_string()),
            stock_item_id: Set(stock_item_id),
            quantity: Set(quantity),
            part_number: Set(part_number.to_string()),
            unit_price: Set(unit_price),
            status: Set(EntryStatus::Pending),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}
