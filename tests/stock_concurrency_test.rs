mod common;

use common::{assert_conserved, available, cart_quantity, seed_stock_item, TestContext};
use partflow::errors::ServiceError;
use rust_decimal_macros::dec;

/// Tests cover:
/// - Concurrent reservations against one stock item never oversell it
/// - Every request resolves to either a reservation or a shortage,
///   with the two counts adding up exactly

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let ctx = TestContext::new().await;
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;

    let mut handles = Vec::new();
    for user_id in 1..=20 {
        let cart = ctx.pipeline.cart_service();
        let stock_item_id = item.id;
        handles.push(tokio::spawn(async move {
            cart.add_to_cart(user_id, stock_item_id, 1).await
        }));
    }

    let mut reserved = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => reserved += 1,
            Err(ServiceError::InsufficientStock { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(reserved, 10, "exactly the seeded quantity must be reserved");
    assert_eq!(refused, 10, "every request past the stock must be refused");
    assert_eq!(available(&ctx, item.id).await, 0);
    assert_eq!(cart_quantity(&ctx, item.id).await, 10);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn concurrent_removals_and_additions_stay_consistent() {
    let ctx = TestContext::new().await;
    let cart = ctx.pipeline.cart_service();
    let item = seed_stock_item(&ctx, "Denso", "AL 500", dec!(80.00), 6).await;

    cart.add_to_cart(1, item.id, 3).await.expect("add failed");
    cart.add_to_cart(2, item.id, 3).await.expect("add failed");

    // One user keeps grabbing while the other drains; totals must hold at
    // every interleaving.
    let grabber = {
        let cart = ctx.pipeline.cart_service();
        let stock_item_id = item.id;
        tokio::spawn(async move {
            let mut landed = 0;
            for _ in 0..4 {
                if cart.add_to_cart(1, stock_item_id, 1).await.is_ok() {
                    landed += 1;
                }
            }
            landed
        })
    };
    let drainer = {
        let cart = ctx.pipeline.cart_service();
        let stock_item_id = item.id;
        tokio::spawn(async move {
            let mut released = 0;
            for _ in 0..3 {
                if cart.remove_from_cart(2, stock_item_id, 1).await.is_ok() {
                    released += 1;
                }
            }
            released
        })
    };

    let landed: i64 = grabber.await.expect("task panicked");
    let released: i64 = drainer.await.expect("task panicked");
    assert_eq!(released, 3, "each removal had a reservation to release");

    // 6 seeded, 6 reserved up front, `released` freed and `landed` re-taken.
    let item_after = common::get_stock(&ctx, item.id).await;
    assert_eq!(item_after.total_quantity, 6);
    assert_eq!(
        cart_quantity(&ctx, item.id).await,
        6 - released + landed,
        "cart holdings must mirror the successful operations"
    );
    assert_conserved(&ctx, item.id).await;
}
