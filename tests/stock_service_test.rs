mod common;

use assert_matches::assert_matches;
use common::{assert_conserved, available, get_stock, seed_stock_item, TestContext};
use partflow::{errors::ServiceError, events::Event, services::stock::CreateStockItemInput};
use rust_decimal_macros::dec;

/// Tests cover:
/// - Item creation seeds both ledger columns and validates input
/// - Stock intake grows `available` and `total_quantity` together
/// - Shrinkage adjustments shrink both, bounded by free availability
/// - Missing rows and bad quantities are refused without side effects

#[tokio::test]
async fn create_item_seeds_ledger_columns() {
    let mut ctx = TestContext::new().await;

    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    assert_eq!(item.available, 10);
    assert_eq!(item.total_quantity, 10);
    assert_eq!(item.sell_price, dec!(25.00));

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::StockItemCreated { stock_item_id, .. } if *stock_item_id == item.id)));
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn create_item_rejects_blank_brand_and_negative_price() {
    let ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();

    let input = CreateStockItemInput {
        brand: String::new(),
        part_number: "BP 1234".to_string(),
        alt_part_number: None,
        description: None,
        application: None,
        location: None,
        cost_price: dec!(10.00),
        sell_price: dec!(25.00),
        initial_quantity: 5,
    };
    let err = stock
        .create_item(input.clone())
        .await
        .expect_err("blank brand must be refused");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = stock
        .create_item(CreateStockItemInput {
            brand: "Bosch".to_string(),
            sell_price: dec!(-1.00),
            ..input
        })
        .await
        .expect_err("negative price must be refused");
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn receive_stock_grows_available_and_total() {
    let mut ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();
    let item = seed_stock_item(&ctx, "Denso", "AL 500", dec!(80.00), 3).await;

    let updated = stock
        .receive_stock(item.id, 7)
        .await
        .expect("intake failed");
    assert_eq!(updated.available, 10);
    assert_eq!(updated.total_quantity, 10);

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StockReceived {
            stock_item_id,
            quantity: 7,
            available: 10,
        } if *stock_item_id == item.id
    )));
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn receive_stock_refuses_bad_input() {
    let ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();
    let item = seed_stock_item(&ctx, "Denso", "AL 500", dec!(80.00), 3).await;

    let err = stock
        .receive_stock(item.id, 0)
        .await
        .expect_err("zero intake must be refused");
    assert_matches!(err, ServiceError::InvalidQuantity(0));

    let err = stock
        .receive_stock(item.id + 999, 5)
        .await
        .expect_err("unknown item must be refused");
    assert_matches!(err, ServiceError::NotFound(_));

    // Neither attempt touched the ledger.
    assert_eq!(available(&ctx, item.id).await, 3);
}

#[tokio::test]
async fn shrinkage_shrinks_available_and_total_together() {
    let ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    let updated = stock
        .adjust_shrinkage(item.id, 4, "water damage".to_string())
        .await
        .expect("shrinkage failed");
    assert_eq!(updated.available, 6);
    assert_eq!(updated.total_quantity, 6);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn shrinkage_cannot_eat_into_reserved_quantity() {
    let ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    // 6 of the 10 are reserved; only 4 are free to write off.
    cart.add_to_cart(1, item.id, 6).await.expect("reserve failed");

    let err = stock
        .adjust_shrinkage(item.id, 5, "shelf audit".to_string())
        .await
        .expect_err("shrinkage past availability must be refused");
    match err {
        ServiceError::InsufficientStock(shortages) => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].stock_item_id, item.id);
            assert_eq!(shortages[0].requested, 5);
            assert_eq!(shortages[0].available, 4);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The refused adjustment left both columns alone.
    let after = get_stock(&ctx, item.id).await;
    assert_eq!(after.available, 4);
    assert_eq!(after.total_quantity, 10);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn get_item_reports_missing_rows() {
    let ctx = TestContext::new().await;
    let stock = ctx.pipeline.stock_service();

    let err = stock
        .get_item(424242)
        .await
        .expect_err("unknown item must be NotFound");
    assert_matches!(err, ServiceError::NotFound(_));
}
