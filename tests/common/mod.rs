//! Shared harness for integration tests: an isolated SQLite database per
//! test plus quantity-accounting helpers over the pipeline tables.
#![allow(dead_code)]

use std::sync::Arc;

use partflow::{
    config::AppConfig,
    db,
    entities::{
        cart_reservation::{self, Entity as CartReservation},
        cashier_entry::{self, Entity as CashierEntry},
        sales_record::{self, Entity as SalesRecord},
        service_entry::{self, Entity as ServiceEntry},
        stock_item::{self, Entity as StockItem},
        warehouse_entry::{self, Entity as WarehouseEntry},
        EntryStatus,
    },
    events::{Event, EventSender},
    services::stock::CreateStockItemInput,
    PipelineContext,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Test harness holding a fresh database and the service context.
///
/// Each instance gets its own SQLite file in a temp directory, so tests in
/// one binary can run in parallel without seeing each other's rows. The
/// pool is pinned to a single connection to keep SQLite write behavior
/// deterministic. The event receiver is kept open on the harness so tests
/// can assert on emitted events with [`TestContext::drain_events`].
pub struct TestContext {
    pub pipeline: PipelineContext,
    events: mpsc::Receiver<Event>,
    _db_dir: TempDir,
}

impl TestContext {
    /// Construct a new context with fresh, migrated database state.
    pub async fn new() -> Self {
        let db_dir = TempDir::new().expect("failed to create temp dir for test database");
        let db_path = db_dir.path().join("partflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(tx));

        Self {
            pipeline: PipelineContext::new(Arc::new(pool), Arc::new(cfg), event_sender),
            events: rx,
            _db_dir: db_dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.pipeline.db.as_ref()
    }

    /// Everything currently queued on the event channel.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Creates a catalog row through the stock service, seeding `quantity`
/// into both `available` and `total_quantity`.
pub async fn seed_stock_item(
    ctx: &TestContext,
    brand: &str,
    part_number: &str,
    sell_price: Decimal,
    quantity: i64,
) -> stock_item::Model {
    ctx.pipeline
        .stock_service()
        .create_item(CreateStockItemInput {
            brand: brand.to_string(),
            part_number: part_number.to_string(),
            alt_part_number: None,
            description: None,
            application: None,
            location: Some("A-01".to_string()),
            cost_price: Decimal::ZERO,
            sell_price,
            initial_quantity: quantity,
        })
        .await
        .expect("failed to seed stock item")
}

pub async fn get_stock(ctx: &TestContext, stock_item_id: i64) -> stock_item::Model {
    StockItem::find_by_id(stock_item_id)
        .one(ctx.db())
        .await
        .expect("stock item query failed")
        .expect("stock item missing")
}

pub async fn available(ctx: &TestContext, stock_item_id: i64) -> i64 {
    get_stock(ctx, stock_item_id).await.available
}

/// Total quantity reserved in carts for this item, across all users.
pub async fn cart_quantity(ctx: &TestContext, stock_item_id: i64) -> i64 {
    CartReservation::find()
        .filter(cart_reservation::Column::StockItemId.eq(stock_item_id))
        .all(ctx.db())
        .await
        .expect("cart query failed")
        .iter()
        .map(|r| r.quantity)
        .sum()
}

pub async fn warehouse_pending(ctx: &TestContext, stock_item_id: i64) -> i64 {
    WarehouseEntry::find()
        .filter(warehouse_entry::Column::StockItemId.eq(stock_item_id))
        .filter(warehouse_entry::Column::Status.eq(EntryStatus::Pending))
        .all(ctx.db())
        .await
        .expect("warehouse query failed")
        .iter()
        .map(|e| e.quantity)
        .sum()
}

pub async fn service_pending(ctx: &TestContext, stock_item_id: i64) -> i64 {
    ServiceEntry::find()
        .filter(service_entry::Column::StockItemId.eq(stock_item_id))
        .filter(service_entry::Column::Status.eq(EntryStatus::Pending))
        .all(ctx.db())
        .await
        .expect("service query failed")
        .iter()
        .map(|e| e.quantity)
        .sum()
}

pub async fn cashier_pending(ctx: &TestContext, stock_item_id: i64) -> i64 {
    CashierEntry::find()
        .filter(cashier_entry::Column::StockItemId.eq(stock_item_id))
        .filter(cashier_entry::Column::Status.eq(EntryStatus::Pending))
        .all(ctx.db())
        .await
        .expect("cashier query failed")
        .iter()
        .map(|e| e.quantity)
        .sum()
}

pub async fn sold_quantity(ctx: &TestContext, stock_item_id: i64) -> i64 {
    SalesRecord::find()
        .filter(sales_record::Column::StockItemId.eq(stock_item_id))
        .all(ctx.db())
        .await
        .expect("sales query failed")
        .iter()
        .map(|r| r.quantity)
        .sum()
}

/// Asserts the conservation invariant for one item: free quantity plus
/// every pending holding plus the sales history equals `total_quantity`.
/// Retained audit rows count zero; their quantity is already back in
/// `available`.
pub async fn assert_conserved(ctx: &TestContext, stock_item_id: i64) {
    let item = get_stock(ctx, stock_item_id).await;
    let cart = cart_quantity(ctx, stock_item_id).await;
    let warehouse = warehouse_pending(ctx, stock_item_id).await;
    let service = service_pending(ctx, stock_item_id).await;
    let cashier = cashier_pending(ctx, stock_item_id).await;
    let sold = sold_quantity(ctx, stock_item_id).await;

    let sum = item.available + cart + warehouse + service + cashier + sold;
    assert_eq!(
        sum, item.total_quantity,
        "conservation broken for stock item {}: available {} + cart {} + warehouse {} \
         + service {} + cashier {} + sold {} = {}, expected total {}",
        stock_item_id,
        item.available,
        cart,
        warehouse,
        service,
        cashier,
        sold,
        sum,
        item.total_quantity
    );
}
