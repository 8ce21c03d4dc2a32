use crate::{
    config::AppConfig,
    db::{guard, transaction_with_retries, DbPool},
    entities::stock_item::{self, Entity as StockItem},
    errors::{ServiceError, Shortage},
    events::{Event, EventSender},
    services::Paged,
    ListQuery,
};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, Order, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

lazy_static! {
    static ref STOCK_INTAKES: IntCounter = IntCounter::new(
        "stock_intakes_total",
        "Total number of stock intake operations"
    )
    .expect("metric can be created");
    static ref STOCK_ADJUSTMENTS: IntCounter = IntCounter::new(
        "stock_adjustments_total",
        "Total number of shrinkage adjustments"
    )
    .expect("metric can be created");
    static ref STOCK_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "stock_operation_failures_total",
            "Total number of failed stock operations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Availability filter for catalog listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockFilter {
    #[default]
    All,
    InStock,
    OutOfStock,
    /// Above zero but at or below the configured threshold.
    LowStock,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateStockItemInput {
    #[validate(length(min = 1, max = 100, message = "Brand must not be empty"))]
    pub brand: String,
    #[validate(length(min = 1, max = 100, message = "Part number must not be empty"))]
    pub part_number: String,
    pub alt_part_number: Option<String>,
    pub description: Option<String>,
    pub application: Option<String>,
    pub location: Option<String>,
    pub cost_price: Decimal,
    pub sell_price: Decimal,
    #[validate(range(min = 0, message = "Initial quantity must not be negative"))]
    pub initial_quantity: i64,
}

/// Stock ledger service: catalog maintenance plus the only two operations
/// allowed to change `total_quantity` (intake and shrinkage).
#[derive(Clone)]
pub struct StockService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl StockService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Creates a catalog row. `initial_quantity` seeds both `available` and
    /// `total_quantity`.
    #[instrument(skip(self, input), fields(part_number = %input.part_number))]
    pub async fn create_item(
        &self,
        input: CreateStockItemInput,
    ) -> Result<stock_item::Model, ServiceError> {
        input.validate().map_err(|e| {
            STOCK_FAILURES.with_label_values(&["validation_error"]).inc();
            ServiceError::from(e)
        })?;
        if input.cost_price < Decimal::ZERO || input.sell_price < Decimal::ZERO {
            STOCK_FAILURES.with_label_values(&["validation_error"]).inc();
            return Err(ServiceError::ValidationError(
                "Prices must not be negative".to_string(),
            ));
        }

        let item = stock_item::ActiveModel {
            brand: Set(input.brand),
            part_number: Set(input.part_number),
            alt_part_number: Set(input.alt_part_number),
            description: Set(input.description),
            application: Set(input.application),
            location: Set(input.location),
            cost_price: Set(input.cost_price),
            sell_price: Set(input.sell_price),
            available: Set(input.initial_quantity),
            total_quantity: Set(input.initial_quantity),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        self.event_sender
            .send_or_log(Event::StockItemCreated {
                stock_item_id: item.id,
                part_number: item.part_number.clone(),
            })
            .await;

        info!(
            "Created stock item {}: {} {} x{}",
            item.id, item.brand, item.part_number, item.available
        );
        Ok(item)
    }

    /// Books received stock in. Grows `available` and `total_quantity`
    /// together; this is the only way the conserved pool grows.
    #[instrument(skip(self))]
    pub async fn receive_stock(
        &self,
        stock_item_id: i64,
        quantity: i64,
    ) -> Result<stock_item::Model, ServiceError> {
        if quantity <= 0 {
            STOCK_FAILURES.with_label_values(&["invalid_quantity"]).inc();
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let item = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "receive_stock",
            move |txn| {
                Box::pin(async move {
                    let credited = guard::credit::<stock_item::Entity, _>(
                        txn,
                        stock_item::Column::Available,
                        Condition::all().add(stock_item::Column::Id.eq(stock_item_id)),
                        quantity,
                        None,
                        vec![(
                            stock_item::Column::TotalQuantity,
                            Expr::col(stock_item::Column::TotalQuantity).add(quantity),
                        )],
                    )
                    .await?;
                    if !credited {
                        return Err(ServiceError::NotFound(format!(
                            "Stock item {} not found",
                            stock_item_id
                        )));
                    }

                    StockItem::find_by_id(stock_item_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Stock item {} not found", stock_item_id))
                        })
                })
            },
        )
        .await?;

        STOCK_INTAKES.inc();
        self.event_sender
            .send_or_log(Event::StockReceived {
                stock_item_id,
                quantity,
                available: item.available,
            })
            .await;

        info!(
            "Received {} units of stock item {}: available now {}",
            quantity, stock_item_id, item.available
        );
        Ok(item)
    }

    /// Books shrinkage (damage, loss) out. Shrinks `available` and
    /// `total_quantity` together, guarded so reserved quantity downstream is
    /// never eaten into.
    #[instrument(skip(self))]
    pub async fn adjust_shrinkage(
        &self,
        stock_item_id: i64,
        quantity: i64,
        reason: String,
    ) -> Result<stock_item::Model, ServiceError> {
        if quantity <= 0 {
            STOCK_FAILURES.with_label_values(&["invalid_quantity"]).inc();
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let reason_for_event = reason.clone();
        let item = transaction_with_retries(
            self.db.as_ref(),
            self.config.retry_policy(),
            "adjust_shrinkage",
            move |txn| {
                Box::pin(async move {
                    let debited = guard::debit::<stock_item::Entity, _>(
                        txn,
                        stock_item::Column::Available,
                        Condition::all().add(stock_item::Column::Id.eq(stock_item_id)),
                        quantity,
                        vec![(
                            stock_item::Column::TotalQuantity,
                            Expr::col(stock_item::Column::TotalQuantity).sub(quantity),
                        )],
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

                    StockItem::find_by_id(stock_item_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Stock item {} not found", stock_item_id))
                        })
                })
            },
        )
        .await
        .map_err(|e| {
            STOCK_FAILURES.with_label_values(&[e.metric_label()]).inc();
            e
        })?;

        STOCK_ADJUSTMENTS.inc();
        self.event_sender
            .send_or_log(Event::StockAdjusted {
                stock_item_id,
                quantity,
                reason: reason_for_event,
            })
            .await;

        info!(
            "Adjusted stock item {} down by {} ({}): available now {}",
            stock_item_id, quantity, reason, item.available
        );
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, stock_item_id: i64) -> Result<stock_item::Model, ServiceError> {
        StockItem::find_by_id(stock_item_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock item {} not found", stock_item_id)))
    }

    /// Paginated catalog listing with free-text search, availability filter
    /// and sorting. Search is space-insensitive on part numbers so
    /// "BP 1234" and "BP1234" find the same rows.
    #[instrument(skip(self, query))]
    pub async fn list_items(
        &self,
        query: ListQuery,
        filter: StockFilter,
    ) -> Result<Paged<stock_item::Model>, ServiceError> {
        let limit = self.config.clamp_limit(query.limit);
        let page = query.page.max(1);

        let mut find = StockItem::find();

        if let Some(term) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            find = find.filter(search_condition(term));
        }

        match filter {
            StockFilter::All => {}
            StockFilter::InStock => {
                find = find.filter(stock_item::Column::Available.gt(0));
            }
            StockFilter::OutOfStock => {
                find = find.filter(stock_item::Column::Available.eq(0));
            }
            StockFilter::LowStock => {
                find = find
                    .filter(stock_item::Column::Available.gt(0))
                    .filter(stock_item::Column::Available.lte(self.config.low_stock_threshold));
            }
        }

        let (sort_col, sort_ord) = sort_clause(&query);
        find = find.order_by(sort_col, sort_ord);

        let paginator = find.paginate(self.db.as_ref(), limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Paged {
            items,
            total,
            page,
            limit,
        })
    }
}

/// Maps `sort_by` / `sort_order` onto a column and direction. Unknown
/// values fall back to newest first.
fn sort_clause(query: &ListQuery) -> (stock_item::Column, Order) {
    let ascending = matches!(query.sort_order.as_deref(), Some("asc"));
    match query.sort_by.as_deref() {
        Some("brand") => (
            stock_item::Column::Brand,
            if ascending { Order::Asc } else { Order::Desc },
        ),
        Some("price") => (
            stock_item::Column::SellPrice,
            if ascending { Order::Asc } else { Order::Desc },
        ),
        _ => (stock_item::Column::CreatedAt, Order::Desc),
    }
}

fn search_condition(term: &str) -> Condition {
    let needle = format!("%{}%", term.replace(' ', "").to_lowercase());

    let mut cond = Condition::any()
        .add(squashed_like(stock_item::Column::PartNumber, &needle))
        .add(squashed_like(stock_item::Column::AltPartNumber, &needle))
        .add(squashed_like(stock_item::Column::Brand, &needle))
        .add(squashed_like(stock_item::Column::Description, &needle))
        .add(squashed_like(stock_item::Column::Application, &needle));

    if let Ok(id) = term.trim().parse::<i64>() {
        cond = cond.add(stock_item::Column::Id.eq(id));
    }

    cond
}

/// `LOWER(REPLACE(col, ' ', '')) LIKE needle`, so spacing differences in
/// stored part numbers do not hide matches.
fn squashed_like(col: stock_item::Column, needle: &str) -> SimpleExpr {
    let squashed = Func::cust(Alias::new("replace"))
        .arg(Expr::col((stock_item::Entity, col)))
        .arg(Expr::val(" "))
        .arg(Expr::val(""));
    Expr::expr(Func::lower(squashed)).like(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::IdenStatic;

    fn query(sort_by: Option<&str>, sort_order: Option<&str>) -> ListQuery {
        ListQuery {
            sort_by: sort_by.map(str::to_string),
            sort_order: sort_order.map(str::to_string),
            ..ListQuery::default()
        }
    }

    #[test]
    fn sort_defaults_to_newest_first() {
        let (col, ord) = sort_clause(&query(None, None));
        assert_eq!(col.as_str(), "created_at");
        assert!(matches!(ord, Order::Desc));

        // Unknown column also falls back
        let (col, ord) = sort_clause(&query(Some("nonsense"), Some("asc")));
        assert_eq!(col.as_str(), "created_at");
        assert!(matches!(ord, Order::Desc));
    }

    #[test]
    fn sort_by_brand_and_price() {
        let (col, ord) = sort_clause(&query(Some("brand"), Some("asc")));
        assert_eq!(col.as_str(), "brand");
        assert!(matches!(ord, Order::Asc));

        let (col, ord) = sort_clause(&query(Some("price"), Some("desc")));
        assert_eq!(col.as_str(), "sell_price");
        assert!(matches!(ord, Order::Desc));

        let (col, ord) = sort_clause(&query(Some("price"), None));
        assert_eq!(col.as_str(), "sell_price");
        assert!(matches!(ord, Order::Desc));
    }

    #[test]
    fn create_input_validation() {
        let input = CreateStockItemInput {
            brand: String::new(),
            part_number: "BP1234".to_string(),
            alt_part_number: None,
            description: None,
            application: None,
            location: None,
            cost_price: Decimal::ZERO,
            sell_price: Decimal::ZERO,
            initial_quantity: 0,
        };
        assert!(input.validate().is_err());

        let input = CreateStockItemInput {
            brand: "Bosch".to_string(),
            initial_quantity: -1,
            ..input
        };
        assert!(input.validate().is_err());
    }
}
