mod common;

use assert_matches::assert_matches;
use common::{
    assert_conserved, cashier_pending, seed_stock_item, sold_quantity, TestContext,
};
use partflow::{
    entities::cashier_entry,
    errors::ServiceError,
    services::{
        checkout::OrderLine,
        fulfillment::{CashierLine, PaymentInput},
        warehouse::{Consumer, RouteLine},
    },
    stages::Stage,
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

/// Tests cover:
/// - Payment consumes cashier rows and writes immutable sales records
/// - The caller's total is allocated across lines proportionally to line
///   value, summing exactly to the total
/// - Partial payment decrements in place; full payment deletes at zero
/// - Validation and shortfall failures leave the stage untouched

/// Drives an item through cart, checkout and routing so `quantity` sits at
/// the cashier, returning the order id and the cashier row.
async fn stage_at_cashier(
    ctx: &TestContext,
    stock_item_id: i64,
    quantity: i64,
) -> (String, cashier_entry::Model) {
    let cart = ctx.pipeline.cart_service();
    let checkout = ctx.pipeline.checkout_service();
    let warehouse = ctx.pipeline.warehouse_service();

    cart.add_to_cart(1, stock_item_id, quantity)
        .await
        .expect("add failed");
    let order = checkout
        .submit_cart(
            1,
            vec![OrderLine {
                stock_item_id,
                quantity,
            }],
        )
        .await
        .expect("submission failed");
    warehouse
        .route_to_consumer(
            &order.order_id,
            Consumer::Cashier,
            vec![RouteLine {
                warehouse_entry_id: order.entries[0].id,
                quantity,
            }],
        )
        .await
        .expect("routing failed");

    let row = cashier_entry::Entity::find()
        .filter(cashier_entry::Column::OrderId.eq(order.order_id.clone()))
        .filter(cashier_entry::Column::StockItemId.eq(stock_item_id))
        .one(ctx.db())
        .await
        .expect("cashier query failed")
        .expect("cashier row missing");
    (order.order_id, row)
}

#[tokio::test]
async fn single_line_payment_records_the_exact_total() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    let (order_id, row) = stage_at_cashier(&ctx, item.id, 4).await;

    let records = fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 4,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(95.00),
            },
        )
        .await
        .expect("payment failed");

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.order_id, order_id);
    assert_eq!(record.stock_item_id, item.id);
    assert_eq!(record.quantity, 4);
    // A single line takes the caller's total verbatim, discount included.
    assert_eq!(record.total_amount, dec!(95.00));
    assert_eq!(record.unit_price, dec!(25.00));
    assert_eq!(record.part_number, "BP 1234");
    assert_eq!(record.brand, "Bosch");

    assert_eq!(cashier_pending(&ctx, item.id).await, 0);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn multi_line_total_is_allocated_by_line_value() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    // Line values 75 and 25, so a 90 total splits 67.50 / 22.50.
    let first = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(75.00), 5).await;
    let second = seed_stock_item(&ctx, "Denso", "AL 500", dec!(25.00), 5).await;

    let cart = ctx.pipeline.cart_service();
    let checkout = ctx.pipeline.checkout_service();
    let warehouse = ctx.pipeline.warehouse_service();
    cart.add_to_cart(1, first.id, 1).await.expect("add failed");
    cart.add_to_cart(1, second.id, 1).await.expect("add failed");
    let order = checkout
        .submit_cart(
            1,
            vec![
                OrderLine {
                    stock_item_id: first.id,
                    quantity: 1,
                },
                OrderLine {
                    stock_item_id: second.id,
                    quantity: 1,
                },
            ],
        )
        .await
        .expect("submission failed");
    let route_lines = order
        .entries
        .iter()
        .map(|e| RouteLine {
            warehouse_entry_id: e.id,
            quantity: 1,
        })
        .collect();
    warehouse
        .route_to_consumer(&order.order_id, Consumer::Cashier, route_lines)
        .await
        .expect("routing failed");

    let rows = cashier_entry::Entity::find()
        .filter(cashier_entry::Column::OrderId.eq(order.order_id.clone()))
        .all(ctx.db())
        .await
        .expect("cashier query failed");
    assert_eq!(rows.len(), 2);

    let records = fulfillment
        .process_payment(
            &order.order_id,
            PaymentInput {
                lines: rows
                    .iter()
                    .map(|r| CashierLine {
                        cashier_entry_id: r.id,
                        quantity: 1,
                    })
                    .collect(),
                payment_method: "card".to_string(),
                total_amount: dec!(90.00),
            },
        )
        .await
        .expect("payment failed");

    assert_eq!(records.len(), 2);
    let by_item = |id: i64| {
        records
            .iter()
            .find(|r| r.stock_item_id == id)
            .expect("missing record")
    };
    assert_eq!(by_item(first.id).total_amount, dec!(67.50));
    assert_eq!(by_item(second.id).total_amount, dec!(22.50));

    let paid: rust_decimal::Decimal = records.iter().map(|r| r.total_amount).sum();
    assert_eq!(paid, dec!(90.00));
    assert_conserved(&ctx, first.id).await;
    assert_conserved(&ctx, second.id).await;
}

#[tokio::test]
async fn partial_payment_decrements_the_cashier_row_in_place() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    let (order_id, row) = stage_at_cashier(&ctx, item.id, 5).await;

    fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 2,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(50.00),
            },
        )
        .await
        .expect("first payment failed");

    let remaining = cashier_entry::Entity::find_by_id(row.id)
        .one(ctx.db())
        .await
        .expect("cashier query failed")
        .expect("row must survive a partial payment");
    assert_eq!(remaining.quantity, 3);
    assert_eq!(sold_quantity(&ctx, item.id).await, 2);

    // Paying off the rest deletes the row.
    fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 3,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(75.00),
            },
        )
        .await
        .expect("second payment failed");

    assert!(cashier_entry::Entity::find_by_id(row.id)
        .one(ctx.db())
        .await
        .expect("cashier query failed")
        .is_none());
    assert_eq!(sold_quantity(&ctx, item.id).await, 5);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn payment_validation_refuses_bad_input() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    let (order_id, row) = stage_at_cashier(&ctx, item.id, 2).await;

    let err = fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![],
                payment_method: "cash".to_string(),
                total_amount: dec!(10.00),
            },
        )
        .await
        .expect_err("empty batch must be refused");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 1,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(0.00),
            },
        )
        .await
        .expect_err("zero total must be refused");
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 1,
                }],
                payment_method: "   ".to_string(),
                total_amount: dec!(10.00),
            },
        )
        .await
        .expect_err("blank method must be refused");
    assert_matches!(err, ServiceError::ValidationError(_));

    // All three refusals happened before any row was touched.
    assert_eq!(cashier_pending(&ctx, item.id).await, 2);
    assert_eq!(sold_quantity(&ctx, item.id).await, 0);
}

#[tokio::test]
async fn short_payment_rolls_back_without_sales_records() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    let (order_id, row) = stage_at_cashier(&ctx, item.id, 2).await;

    let err = fulfillment
        .process_payment(
            &order_id,
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 5,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(125.00),
            },
        )
        .await
        .expect_err("short payment must be refused");
    match err {
        ServiceError::InsufficientQuantity { stage, shortage } => {
            assert_eq!(stage, Stage::Cashier);
            assert_eq!(shortage.requested, 5);
            assert_eq!(shortage.available, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(cashier_pending(&ctx, item.id).await, 2);
    assert_eq!(sold_quantity(&ctx, item.id).await, 0);
    assert_conserved(&ctx, item.id).await;
}

#[tokio::test]
async fn payment_checks_the_order_id() {
    let ctx = TestContext::new().await;
    let fulfillment = ctx.pipeline.fulfillment_service();
    let item = seed_stock_item(&ctx, "Bosch", "BP 1234", dec!(25.00), 10).await;
    let (_order_id, row) = stage_at_cashier(&ctx, item.id, 2).await;

    let err = fulfillment
        .process_payment(
            "ORD-000000000000",
            PaymentInput {
                lines: vec![CashierLine {
                    cashier_entry_id: row.id,
                    quantity: 1,
                }],
                payment_method: "cash".to_string(),
                total_amount: dec!(25.00),
            },
        )
        .await
        .expect_err("entry addressed through the wrong order must be refused");
    assert_matches!(err, ServiceError::NotFound(_));
    assert_eq!(cashier_pending(&ctx, item.id).await, 2);
}
