mod common;

use assert_matches::assert_matches;
use common::{assert_conserved, available, cart_quantity, seed_stock_item, TestContext};
use partflow::{errors::ServiceError, events::Event};
use rust_decimal_macros::dec;
use test_case::test_case;

/// Tests cover:
/// - Adding to the cart debits the ledger and is refused on shortfall
/// - Repeated adds sum into one reservation row per (user, item)
/// - Removal credits the ledger back, clamped to the reserved quantity
/// - A reservation that reaches zero is deleted, never kept
/// - Low-stock warnings fire when a reservation drains the ledger

#[tokio::test]
async fn add_to_cart_moves_quantity_from_ledger_to_cart() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    let reservation = cart
        .add_to_cart(1, item.id, 4)
        .await
        .expect("reservation failed");
    assert_eq!(reservation.user_id, 1);
    assert_eq!(reservation.stock_item_id, item.id);
    assert_eq!(reservation.quantity, 4);

    assert_eq!(available(&ctx, item.id).await, 6);
    assert_eq!(cart_quantity(&ctx, item.id).await, 4);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn repeated_adds_sum_into_one_row() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    cart.add_to_cart(1, item.id, 3).await.expect("first add failed");
    let reservation = cart
        .add_to_cart(1, item.id, 2)
        .await
        .expect("second add failed");
    assert_eq!(reservation.quantity, 5);

    let rows = cart.get_cart(1).await.expect("cart fetch failed");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, 5);
    assert_eq!(available(&ctx, item.id).await, 5);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn add_is_refused_on_shortfall_without_side_effects() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 2).await;

    let err = cart
        .add_to_cart(1, item.id, 5)
        .await
        .expect_err("shortfall must be refused");
    match err {
        ServiceError::InsufficientStock(shortages) => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].stock_item_id, item.id);
            assert_eq!(shortages[0].requested, 5);
            assert_eq!(shortages[0].available, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(available(&ctx, item.id).await, 2);
    assert_eq!(cart_quantity(&ctx, item.id).await, 0);
}

#[test_case(0 ; "zero quantity")]
#[test_case(-4 ; "negative quantity")]
#[tokio::test]
async fn add_rejects_nonpositive_quantities(quantity: i64) {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    let err = cart
        .add_to_cart(1, item.id, quantity)
        .await
        .expect_err("nonpositive quantity must be refused");
    assert_matches!(err, ServiceError::InvalidQuantity(q) if q == quantity);
    assert_eq!(available(&ctx, item.id).await, 10);
}

#[tokio::test]
async fn add_for_unknown_item_is_not_found() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();

    let err = cart
        .add_to_cart(1, 424242, 1)
        .await
        .expect_err("unknown item must be refused");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn partial_removal_credits_the_ledger() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    cart.add_to_cart(1, item.id, 6).await.expect("add failed");

    let remaining = cart
        .remove_from_cart(1, item.id, 2)
        .await
        .expect("removal failed")
        .expect("reservation should survive a partial removal");
    assert_eq!(remaining.quantity, 4);

    assert_eq!(available(&ctx, item.id).await, 6);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn full_removal_deletes_the_row() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    cart.add_to_cart(1, item.id, 5).await.expect("add failed");

    let remaining = cart
        .remove_from_cart(1, item.id, 5)
        .await
        .expect("removal failed");
    assert!(remaining.is_none(), "emptied reservation must be deleted");

    assert_eq!(available(&ctx, item.id).await, 10);
    assert_eq!(cart_quantity(&ctx, item.id).await, 0);
    assert!(cart.get_cart(1).await.expect("cart fetch failed").is_empty());
}

#[tokio::test]
async fn removal_is_clamped_to_the_reserved_quantity() {
    let mut ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    cart.add_to_cart(1, item.id, 3).await.expect("add failed");
    ctx.drain_events();

    // Asking for more than is reserved releases only what the row holds;
    // the ledger must not be credited past its starting point.
    let remaining = cart
        .remove_from_cart(1, item.id, 7)
        .await
        .expect("removal failed");
    assert!(remaining.is_none());
    assert_eq!(available(&ctx, item.id).await, 10);

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ItemRemovedFromCart { quantity: 3, .. }
    )));
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn removal_without_reservation_is_not_found() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    let err = cart
        .remove_from_cart(9, item.id, 1)
        .await
        .expect_err("missing reservation must be refused");
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn draining_the_ledger_emits_a_low_stock_warning() {
    let mut ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    // Default threshold is 5: dropping availability to 4 must warn.
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 6).await;
    ctx.drain_events();

    cart.add_to_cart(1, item.id, 2).await.expect("add failed");

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::LowStockDetected {
            stock_item_id,
            available: 4,
            threshold: 5,
        } if *stock_item_id == item.id
    )));
}

#[tokio::test]
async fn carts_are_isolated_per_user() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    cart.add_to_cart(1, item.id, 2).await.expect("add failed");
    cart.add_to_cart(2, item.id, 3).await.expect("add failed");

    let first = cart.get_cart(1).await.expect("cart fetch failed");
    let second = cart.get_cart(2).await.expect("cart fetch failed");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].quantity, 2);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].quantity, 3);

    assert_eq!(available(&ctx, item.id).await, 5);
    assert_eq!(cart_quantity(&ctx, item.id).await, 5);
    assert_conserved(&ctx, item.id).await;
}
