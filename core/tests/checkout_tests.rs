//! End-to-end checkout behavior over the in-memory store: the happy
//! path, every rejection, and the compensation that follows each one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    checkout_request, fill_cart, save10_coupon, seed_warehouse_stock, stack, stack_with,
    stack_with_shipping, BrokenShipping, FailingStore, StalledShipping,
};
use leafshop_core::{
    AddItemInput, CartOwner, CollectingReconciliation, CoreError, CouponRejection,
    InventoryLedger, MemoryStore, OrderRepository, OrderStatus, PaymentStatus, RetryConfig,
    StockInput,
};

#[tokio::test]
async fn checkout_with_save10_discounts_ten_percent() {
    // No shipping charge so the totals mirror the plain discount math.
    let stack = stack_with(Arc::new(MemoryStore::new()), 0.0, RetryConfig::default());
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    stack.coupons.create(save10_coupon()).await.unwrap();
    fill_cart(&stack, "u1", "tea-01", 5, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", Some("SAVE10")))
        .await
        .unwrap();

    assert_eq!(summary.subtotal, 55.0);
    assert_eq!(summary.discount_amount, 5.5);
    assert_eq!(summary.total_amount, 49.5);
    assert_eq!(summary.status, OrderStatus::Pending);

    // The discount record and the usage record carry the same amount.
    let order = stack.orders.get("u1", &summary.order_id).await.unwrap();
    let discount = order.discount.unwrap();
    assert_eq!(discount.coupon_code, "SAVE10");
    assert_eq!(discount.discount_amount, 5.5);

    let usages = stack.coupons.list_usages("SAVE10").await.unwrap();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].order_id, summary.order_id);
    assert_eq!(usages[0].applied_amount, 5.5);
}

#[tokio::test]
async fn checkout_reserves_stock_and_clears_the_cart() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 3, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();
    assert_eq!(summary.subtotal, 33.0);
    assert_eq!(summary.shipping_amount, 10.0);
    assert_eq!(summary.total_amount, 43.0);

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.quantity, 10);
    assert_eq!(line.reserved_quantity, 3);
    assert_eq!(line.available_quantity, 7);

    let cart = stack
        .carts
        .view(&CartOwner::User("u1".to_string()))
        .await
        .unwrap();
    assert!(cart.items.is_empty());

    let order = stack.orders.get("u1", &summary.order_id).await.unwrap();
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].allocations.len(), 1);
    assert_eq!(order.items[0].allocations[0].warehouse_id, "w1");
    assert_eq!(order.items[0].allocations[0].quantity, 3);

    // Payment intent was recorded, awaiting capture.
    let payment = order.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, 43.0);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let stack = stack();
    let err = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptyCart));
}

#[tokio::test]
async fn fully_reserved_line_rejects_checkout() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 5).await;
    // Another checkout already holds every unit.
    stack.ledger.reserve("w1", "tea-01", None, 5).await.unwrap();

    fill_cart(&stack, "u1", "tea-01", 5, 11.0).await;
    let err = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap_err();

    match err {
        CoreError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, "tea-01");
            assert_eq!(requested, 5);
            assert_eq!(available, 0);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing changed and the cart survives for another attempt.
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 5);
    let cart = stack
        .carts
        .view(&CartOwner::User("u1".to_string()))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn order_write_failure_rolls_everything_back() {
    let memory = Arc::new(MemoryStore::new());
    // Order records live under USER#<uid>#ORDER#<oid>; fail those writes.
    let failing = Arc::new(FailingStore::new(memory.clone(), |key| {
        key.pk.contains("#ORDER#")
    }));
    let stack = stack_with(failing, 10.0, RetryConfig::default());

    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    stack.coupons.create(save10_coupon()).await.unwrap();
    fill_cart(&stack, "u1", "tea-01", 5, 11.0).await;

    let err = stack
        .checkout
        .checkout(checkout_request("u1", Some("SAVE10")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)));

    // Reservations were released.
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 0);
    assert_eq!(line.available_quantity, 10);

    // The coupon application was rolled back.
    let meta = stack.coupons.get("SAVE10").await.unwrap();
    assert_eq!(meta.used_count, 0);
    assert!(stack.coupons.list_usages("SAVE10").await.unwrap().is_empty());

    // No order is visible and the cart is intact.
    assert!(stack.store.scan_pk_prefix("ORDER#").await.unwrap().is_empty());
    let cart = stack
        .carts
        .view(&CartOwner::User("u1".to_string()))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);

    // Every compensation succeeded, so nothing needs reconciliation.
    assert!(stack.reconciliation.is_empty());
}

#[tokio::test]
async fn shipping_failure_releases_reservations_and_coupon() {
    let stack = stack_with_shipping(
        Arc::new(MemoryStore::new()),
        Arc::new(BrokenShipping),
        RetryConfig::default(),
    );
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    stack.coupons.create(save10_coupon()).await.unwrap();
    fill_cart(&stack, "u1", "tea-01", 5, 11.0).await;

    let err = stack
        .checkout
        .checkout(checkout_request("u1", Some("SAVE10")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ShippingUnavailable(_)));

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 0);
    assert_eq!(stack.coupons.get("SAVE10").await.unwrap().used_count, 0);
}

#[tokio::test]
async fn rejected_coupon_releases_reservations() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    stack.coupons.create(save10_coupon()).await.unwrap();
    // Subtotal 33 is under the 50 minimum.
    fill_cart(&stack, "u1", "tea-01", 3, 11.0).await;

    let err = stack
        .checkout
        .checkout(checkout_request("u1", Some("SAVE10")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::CouponRejected(CouponRejection::MinPurchaseNotMet)
    ));

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 0);
}

#[tokio::test]
async fn lines_sharing_a_stock_line_are_rejected() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;

    // Two sizes of the same product are separate cart lines, but both
    // draw on the single product-level stock line.
    let owner = CartOwner::User("u1".to_string());
    for size in ["S", "L"] {
        stack
            .carts
            .add_item(
                &owner,
                AddItemInput {
                    product_id: "tea-01".to_string(),
                    variant_id: None,
                    product_name: None,
                    size: Some(size.to_string()),
                    category_id: None,
                    quantity: 2,
                    unit_price: 11.0,
                },
            )
            .await
            .unwrap();
    }

    let err = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));

    // Nothing was reserved and the cart survives for the merge.
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 0);
    assert_eq!(stack.carts.view(&owner).await.unwrap().items.len(), 2);
}

#[tokio::test]
async fn dropped_checkout_releases_its_reservations() {
    let stack = stack_with_shipping(
        Arc::new(MemoryStore::new()),
        Arc::new(StalledShipping),
        RetryConfig::default(),
    );
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 4, 11.0).await;

    // The quote never answers; the caller's timeout drops the future
    // with the stock already reserved.
    let result = tokio::time::timeout(
        Duration::from_millis(50),
        stack.checkout.checkout(checkout_request("u1", None)),
    )
    .await;
    assert!(result.is_err());

    // The release runs on a task spawned from the dropped future.
    let mut reserved = u32::MAX;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        reserved = stack
            .ledger
            .get_stock("w1", "tea-01", None)
            .await
            .unwrap()
            .reserved_quantity;
        if reserved == 0 {
            break;
        }
    }
    assert_eq!(reserved, 0);
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.available_quantity, 10);
}

#[tokio::test]
async fn allocation_splits_across_warehouses() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 3).await;
    seed_warehouse_stock(&stack, "w2", "tea-01", 4).await;
    fill_cart(&stack, "u1", "tea-01", 5, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    let order = stack.orders.get("u1", &summary.order_id).await.unwrap();
    let allocations = &order.items[0].allocations;
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].warehouse_id, "w1");
    assert_eq!(allocations[0].quantity, 3);
    assert_eq!(allocations[1].warehouse_id, "w2");
    assert_eq!(allocations[1].quantity, 2);

    assert_eq!(
        stack
            .ledger
            .get_stock("w1", "tea-01", None)
            .await
            .unwrap()
            .reserved_quantity,
        3
    );
    assert_eq!(
        stack
            .ledger
            .get_stock("w2", "tea-01", None)
            .await
            .unwrap()
            .reserved_quantity,
        2
    );
}

#[tokio::test]
async fn variant_stock_is_preferred_over_product_stock() {
    let stack = stack();
    stack
        .ledger
        .create_warehouse("w1", "w1", None)
        .await
        .unwrap();
    stack
        .ledger
        .create_stock(
            "w1",
            StockInput {
                product_id: "tea-01".to_string(),
                variant_id: Some("v1".to_string()),
                quantity: 3,
                reorder_point: None,
                max_stock: None,
                location: None,
            },
        )
        .await
        .unwrap();
    stack
        .ledger
        .create_stock(
            "w1",
            StockInput {
                product_id: "tea-01".to_string(),
                variant_id: None,
                quantity: 10,
                reorder_point: None,
                max_stock: None,
                location: None,
            },
        )
        .await
        .unwrap();

    stack
        .carts
        .add_item(
            &CartOwner::User("u1".to_string()),
            leafshop_core::AddItemInput {
                product_id: "tea-01".to_string(),
                variant_id: Some("v1".to_string()),
                product_name: None,
                size: None,
                category_id: None,
                quantity: 5,
                unit_price: 11.0,
            },
        )
        .await
        .unwrap();

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    // 3 from the variant line, 2 from the product-level fallback.
    let order = stack.orders.get("u1", &summary.order_id).await.unwrap();
    let allocations = &order.items[0].allocations;
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[0].variant_id.as_deref(), Some("v1"));
    assert_eq!(allocations[0].quantity, 3);
    assert_eq!(allocations[1].variant_id, None);
    assert_eq!(allocations[1].quantity, 2);
}

#[tokio::test]
async fn paid_order_commits_stock_and_return_restores_it() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 4, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();
    let order_id = summary.order_id;

    let meta = stack
        .orders
        .mark_payment("u1", &order_id, PaymentStatus::Paid, Some("tx-1".to_string()))
        .await
        .unwrap();
    assert_eq!(meta.status, OrderStatus::Paid);
    assert_eq!(meta.payment_status, PaymentStatus::Paid);

    // Reservation became a permanent decrement.
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.quantity, 6);
    assert_eq!(line.reserved_quantity, 0);

    stack
        .orders
        .update_status("u1", &order_id, OrderStatus::Shipped)
        .await
        .unwrap();
    stack
        .orders
        .update_status("u1", &order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    let meta = stack.orders.process_return("u1", &order_id).await.unwrap();
    assert_eq!(meta.status, OrderStatus::Returned);

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.quantity, 10);
    assert_eq!(line.available_quantity, 10);
}

#[tokio::test]
async fn failed_commit_is_flagged_for_reconciliation() {
    let memory = Arc::new(MemoryStore::new());
    let stack = stack_with(memory.clone(), 10.0, RetryConfig::default());
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 2, 11.0).await;
    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    // Same data, but inventory writes now fail; the payment and meta
    // records live in other partitions and still go through.
    let failing = Arc::new(FailingStore::new(memory.clone(), |key| {
        key.pk.starts_with("WAREHOUSE#")
    }));
    let ledger = Arc::new(InventoryLedger::new(failing.clone(), RetryConfig::default()));
    let reconciliation = Arc::new(CollectingReconciliation::new());
    let orders = OrderRepository::new(
        failing,
        ledger,
        RetryConfig::default(),
        reconciliation.clone(),
    );

    // The capture still lands even though the ledger write does not.
    let meta = orders
        .mark_payment(
            "u1",
            &summary.order_id,
            PaymentStatus::Paid,
            Some("tx-1".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(meta.status, OrderStatus::Paid);
    assert_eq!(meta.payment_status, PaymentStatus::Paid);

    // The commit failure was flagged, and the line keeps its reservation
    // until an operator repairs it.
    let entries = reconciliation.drain();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "commit-reservation");
    assert!(entries[0].detail.contains(&summary.order_id));
    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.quantity, 10);
    assert_eq!(line.reserved_quantity, 2);
}

#[tokio::test]
async fn cancelling_unpaid_order_releases_reservations() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 4, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    let meta = stack
        .orders
        .update_status("u1", &summary.order_id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(meta.status, OrderStatus::Cancelled);

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.quantity, 10);
    assert_eq!(line.reserved_quantity, 0);
}

#[tokio::test]
async fn failed_payment_releases_reservations() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 2, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    let meta = stack
        .orders
        .mark_payment("u1", &summary.order_id, PaymentStatus::Failed, None)
        .await
        .unwrap();
    assert_eq!(meta.status, OrderStatus::Failed);

    let line = stack.ledger.get_stock("w1", "tea-01", None).await.unwrap();
    assert_eq!(line.reserved_quantity, 0);
    assert_eq!(line.quantity, 10);
}

#[tokio::test]
async fn illegal_status_transitions_are_rejected() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;
    fill_cart(&stack, "u1", "tea-01", 1, 11.0).await;

    let summary = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    // An unpaid order cannot ship.
    let err = stack
        .orders
        .update_status("u1", &summary.order_id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn orders_resolve_by_id_and_list_newest_first() {
    let stack = stack();
    seed_warehouse_stock(&stack, "w1", "tea-01", 10).await;

    fill_cart(&stack, "u1", "tea-01", 1, 11.0).await;
    let first = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();
    fill_cart(&stack, "u1", "tea-01", 2, 11.0).await;
    let second = stack
        .checkout
        .checkout(checkout_request("u1", None))
        .await
        .unwrap();

    let found = stack.orders.find(&second.order_id).await.unwrap();
    assert_eq!(found.meta.user_id, "u1");
    assert_eq!(found.meta.subtotal, 22.0);

    let listed = stack.orders.list_for_user("u1").await.unwrap();
    assert_eq!(listed.len(), 2);
    let ids: Vec<_> = listed.iter().map(|o| o.order_id.as_str()).collect();
    assert!(ids.contains(&first.order_id.as_str()));
    assert!(ids.contains(&second.order_id.as_str()));

    let err = stack.orders.get("u1", "no-such-order").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn guest_must_sign_in_before_checkout() {
    let stack = stack();
    let mut request = checkout_request("", None);
    request.user_id = String::new();
    let err = stack.checkout.checkout(request).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument(_)));
}
