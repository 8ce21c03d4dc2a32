use crate::{
    config::AppConfig,
    db::{guard, transaction_with_retries, DbPool},
    entities::{
        cart_reservation::{self, Entity as CartReservation},
        stock_item::Entity as StockItem,
        warehouse_entry, EntryStatus,
    },
    errors::{ServiceError, Shortage},
    events::{Event, EventSender},
    stages::Stage,
};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use rand::Rng;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};

lazy_static! {
    static ref ORDER_SUBMISSIONS: IntCounter = IntCounter::new(
        "order_submissions_total",
        "Total number of carts submitted into orders"
    )
    .expect("metric can be created");
    static ref CHECKOUT_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "checkout_failures_total",
            "Total number of failed cart submissions"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// One requested order line, addressed by item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub stock_item_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedOrder {
    pub order_id: String,
    pub entries: Vec<warehouse_entry::Model>,
}

/// Checkout service: turns cart reservations into warehouse holdings.
///
/// The cart is the reservation of record, so submission never touches the
/// stock ledger. It consumes reservation rows and writes warehouse entries
/// that snapshot the catalog at submit time.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Submits a batch of cart lines as one order, all-or-nothing.
    ///
    /// Every line is validated against the user's reservations before any
    /// row is touched; a shortfall reports the worst line. Consumed
    /// reservations are deleted at zero. Returns the generated order id and
    /// the warehouse entries created for it.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn submit_cart(
        &self,
        user_id: i64,
        lines: Vec<OrderLine>,
    ) -> Result<SubmittedOrder, ServiceError> {
        if lines.is_empty() {
            CHECKOUT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(ServiceError::ValidationError(
                "Cart submission requires at least one line".to_string(),
            ));
        }
        for line in &lines {
            if line.quantity <= 0 {
                CHECKOUT_FAILURES
                    .with_label_values(&["invalid_quantity"])
                    .inc();
                return Err(ServiceError::InvalidQuantity(line.quantity));
            }
        }

        // Repeated lines for one item are combined. Processing in item
        // order keeps row lock acquisition consistent across concurrent
        // submissions.
        let mut merged: BTreeMap<i64, i64> = BTreeMap::new();
        for line in &lines {
            *merged.entry(line.stock_item_id).or_insert(0) += line.quantity;
        }

        let order_id = generate_order_id();
        let order_id_for_txn = order_id.clone();

        let entries = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "submit_cart",
            move |txn| {
                let order_id = order_id_for_txn.clone();
                let merged = merged.clone();
                Box::pin(async move {
                    let reservations: HashMap<i64, cart_reservation::Model> =
                        CartReservation::find()
                            .filter(cart_reservation::Column::UserId.eq(user_id))
                            .all(txn)
                            .await?
                            .into_iter()
                            .map(|r| (r.stock_item_id, r))
                            .collect();

                    // Validate the whole batch up front so the error names
                    // the worst line, not just the first one hit.
                    let mut worst: Option<Shortage> = None;
                    for (&stock_item_id, &qty) in &merged {
                        match reservations.get(&stock_item_id) {
                            None => {
                                return Err(ServiceError::NotFound(format!(
                                    "No cart reservation for stock item {}",
                                    stock_item_id
                                )));
                            }
                            Some(r) if r.quantity < qty => {
                                let shortage = Shortage {
                                    stock_item_id,
                                    requested: qty,
                                    available: r.quantity,
                                };
                                let worse = worst.map_or(true, |w| {
                                    shortage.requested - shortage.available
                                        > w.requested - w.available
                                });
                                if worse {
                                    worst = Some(shortage);
                                }
                            }
                            _ => {}
                        }
                    }
                    if let Some(shortage) = worst {
                        return Err(ServiceError::InsufficientQuantity {
                            stage: Stage::Cart,
                            shortage,
                        });
                    }

                    let mut entries = Vec::with_capacity(merged.len());
                    for (&stock_item_id, &qty) in &merged {
                        let row = Condition::all()
                            .add(cart_reservation::Column::UserId.eq(user_id))
                            .add(cart_reservation::Column::StockItemId.eq(stock_item_id));

                        let debited = guard::debit::<cart_reservation::Entity, _>(
                            txn,
                            cart_reservation::Column::Quantity,
                            row.clone(),
                            qty,
                            vec![],
                        )
                        .await?;
                        if !debited {
                            let available = reservations
                                .get(&stock_item_id)
                                .map(|r| r.quantity)
                                .unwrap_or(0);
                            return Err(ServiceError::InsufficientQuantity {
                                stage: Stage::Cart,
                                shortage: Shortage {
                                    stock_item_id,
                                    requested: qty,
                                    available,
                                },
                            });
                        }
                        guard::delete_if_empty::<cart_reservation::Entity, _>(
                            txn,
                            cart_reservation::Column::Quantity,
                            row,
                        )
                        .await?;

                        let item = StockItem::find_by_id(stock_item_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Stock item {} not found",
                                    stock_item_id
                                ))
                            })?;

                        let entry = warehouse_entry::ActiveModel {
                            order_id: Set(order_id.clone()),
                            user_id: Set(user_id),
                            stock_item_id: Set(stock_item_id),
                            quantity: Set(qty),
                            part_number: Set(item.part_number),
                            description: Set(item.description),
                            unit_price: Set(item.sell_price),
                            location: Set(item.location),
                            status: Set(EntryStatus::Pending),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await?;
                        entries.push(entry);
                    }

                    Ok(entries)
                })
            },
        )
        .await
        .map_err(|e| {
            CHECKOUT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        ORDER_SUBMISSIONS.inc();
        self.event_sender
            .send_or_log(Event::OrderSubmitted {
                order_id: order_id.clone(),
                user_id,
                line_count: entries.len(),
            })
            .await;

        info!(
            "Submitted order {} for user {} with {} lines",
            order_id,
            user_id,
            entries.len()
        );
        Ok(SubmittedOrder { order_id, entries })
    }
}

/// Opaque order key: "ORD-" plus 12 hex characters.
fn generate_order_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill(&mut bytes);
    format!("ORD-{}", hex::encode(bytes))
}
