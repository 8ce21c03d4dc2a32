use crate::{
    config::AppConfig,
    db::{guard, transaction_with_retries, DbPool},
    entities::{
        cart_reservation::{self, Entity as CartReservation},
        stock_item::{self, Entity as StockItem},
    },
    errors::{ServiceError, Shortage},
    events::{Event, EventSender},
    stages::Stage,
};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

lazy_static! {
    static ref CART_ADDITIONS: IntCounter = IntCounter::new(
        "cart_additions_total",
        "Total number of cart reservation additions"
    )
    .expect("metric can be created");
    static ref CART_REMOVALS: IntCounter = IntCounter::new(
        "cart_removals_total",
        "Total number of cart reservation removals"
    )
    .expect("metric can be created");
    static ref CART_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "cart_operation_failures_total",
            "Total number of failed cart operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Cart service. A reservation is binding: its quantity has already left
/// the ledger's `available` count, so checkout later never touches the
/// ledger again.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Reserves `quantity` of an item for a user.
    ///
    /// Repeated adds sum into the existing reservation row. Fails with
    /// `InsufficientStock` when the ledger cannot cover the request, naming
    /// the item with requested and available amounts.
    #[instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: i64,
        stock_item_id: i64,
        quantity: i64,
    ) -> Result<cart_reservation::Model, ServiceError> {
        if quantity <= 0 {
            CART_FAILURES.with_label_values(&["invalid_quantity"]).inc();
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let (reservation, remaining) = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "add_to_cart",
            move |txn| {
                Box::pin(async move {
                    let debited = guard::debit::<stock_item::Entity, _>(
                        txn,
                        stock_item::Column::Available,
                        Condition::all().add(stock_item::Column::Id.eq(stock_item_id)),
                        quantity,
                        vec![],
                    )
                    .await?;
                    if !debited {
                        let item = StockItem::find_by_id(stock_item_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "Stock item {} not found",
                                    stock_item_id
                                ))
                            })?;
                        return Err(ServiceError::InsufficientStock(vec![Shortage {
                            stock_item_id,
                            requested: quantity,
                            available: item.available,
                        }]));
                    }

                    // The ledger debit above locks the item row, which
                    // serializes concurrent adds for the same item. The
                    // read-then-write upsert below cannot lose an update.
                    let reservation = match CartReservation::find_by_id((user_id, stock_item_id))
                        .one(txn)
                        .await?
                    {
                        Some(existing) => {
                            let summed = existing.quantity + quantity;
                            let mut active: cart_reservation::ActiveModel = existing.into();
                            active.quantity = Set(summed);
                            active.update(txn).await?
                        }
                        None => {
                            cart_reservation::ActiveModel {
                                user_id: Set(user_id),
                                stock_item_id: Set(stock_item_id),
                                quantity: Set(quantity),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await?
                        }
                    };

                    let remaining = StockItem::find_by_id(stock_item_id)
                        .one(txn)
                        .await?
                        .map(|item| item.available)
                        .unwrap_or(0);

                    Ok((reservation, remaining))
                })
            },
        )
        .await
        .map_err(|e| {
            CART_FAILURES.with_label_values(&[e.metric_label()]).inc();
            e
        })?;

        CART_ADDITIONS.inc();
        self.event_sender
            .send_or_log(Event::ItemAddedToCart {
                user_id,
                stock_item_id,
                quantity,
            })
            .await;

        if remaining < self.config.low_stock_threshold {
            warn!(
                "Stock item {} is low after cart reservation: {} remaining",
                stock_item_id, remaining
            );
            self.event_sender
                .send_or_log(Event::LowStockDetected {
                    stock_item_id,
                    available: remaining,
                    threshold: self.config.low_stock_threshold,
                })
                .await;
        }

        info!(
            "Reserved {} units of stock item {} for user {}",
            quantity, stock_item_id, user_id
        );
        Ok(reservation)
    }

    /// Releases up to `quantity` units of a reservation back to the ledger.
    ///
    /// The released amount is clamped to what the reservation actually
    /// holds. Returns the surviving reservation row, or `None` when the
    /// release emptied it and the row was deleted.
    #[instrument(skip(self))]
    pub async fn remove_from_cart(
        &self,
        user_id: i64,
        stock_item_id: i64,
        quantity: i64,
    ) -> Result<Option<cart_reservation::Model>, ServiceError> {
        if quantity <= 0 {
            CART_FAILURES.with_label_values(&["invalid_quantity"]).inc();
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let (remaining, released) = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "remove_from_cart",
            move |txn| {
                Box::pin(async move {
                    let reserved = CartReservation::find_by_id((user_id, stock_item_id))
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "No cart reservation for user {} and stock item {}",
                                user_id, stock_item_id
                            ))
                        })?;

                    // Clamped so the ledger can never be credited more than
                    // the cart took out.
                    let release = quantity.min(reserved.quantity);

                    let row = Condition::all()
                        .add(cart_reservation::Column::UserId.eq(user_id))
                        .add(cart_reservation::Column::StockItemId.eq(stock_item_id));

                    let debited = guard::debit::<cart_reservation::Entity, _>(
                        txn,
                        cart_reservation::Column::Quantity,
                        row.clone(),
                        release,
                        vec![],
                    )
                    .await?;
                    if !debited {
                        let available = CartReservation::find_by_id((user_id, stock_item_id))
                            .one(txn)
                            .await?
                            .map(|r| r.quantity)
                            .unwrap_or(0);
                        return Err(ServiceError::InsufficientQuantity {
                            stage: Stage::Cart,
                            shortage: Shortage {
                                stock_item_id,
                                requested: release,
                                available,
                            },
                        });
                    }

                    let credited = guard::credit::<stock_item::Entity, _>(
                        txn,
                        stock_item::Column::Available,
                        Condition::all().add(stock_item::Column::Id.eq(stock_item_id)),
                        release,
                        Some(stock_item::Column::TotalQuantity),
                        vec![],
                    )
                    .await?;
                    if !credited {
                        if StockItem::find_by_id(stock_item_id).one(txn).await?.is_none() {
                            return Err(ServiceError::NotFound(format!(
                                "Stock item {} not found",
                                stock_item_id
                            )));
                        }
                        return Err(ServiceError::Conflict(format!(
                            "Releasing {} units would take stock item {} past its total quantity",
                            release, stock_item_id
                        )));
                    }

                    guard::delete_if_empty::<cart_reservation::Entity, _>(
                        txn,
                        cart_reservation::Column::Quantity,
                        row,
                    )
                    .await?;

                    let remaining = CartReservation::find_by_id((user_id, stock_item_id))
                        .one(txn)
                        .await?;
                    Ok((remaining, release))
                })
            },
        )
        .await
        .map_err(|e| {
            CART_FAILURES.with_label_values(&[e.metric_label()]).inc();
            e
        })?;

        CART_REMOVALS.inc();
        self.event_sender
            .send_or_log(Event::ItemRemovedFromCart {
                user_id,
                stock_item_id,
                quantity: released,
            })
            .await;

        info!(
            "Released {} units of stock item {} from user {}'s cart",
            released, stock_item_id, user_id
        );
        Ok(remaining)
    }

    /// All reservations held by a user, oldest first.
    #[instrument(skip(self))]
    pub async fn get_cart(
        &self,
        user_id: i64,
    ) -> Result<Vec<cart_reservation::Model>, ServiceError> {
        let reservations = CartReservation::find()
            .filter(cart_reservation::Column::UserId.eq(user_id))
            .order_by_asc(cart_reservation::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(reservations)
    }
}
