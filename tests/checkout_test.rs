mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{
    entities::{
        AddressKind, Coupon, CouponUsage, DiscountType, Order, OrderStatus, PaymentStatus, Product,
    },
    errors::ServiceError,
    services::carts::{AddItemInput, CartOwner},
};
use uuid::Uuid;

async fn fill_cart(app: &TestApp, customer_id: Uuid, price: rust_decimal::Decimal, quantity: i32) {
    let product = common::seed_product(app, price, None).await;
    app.state
        .carts
        .add_item(
            &CartOwner::Customer(customer_id),
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn checkout_worked_scenario_with_percentage_coupon() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    common::insert_coupon(
        &app,
        common::coupon_fixture("WELCOME10", DiscountType::Percentage, dec!(10)),
    )
    .await;

    // One item: price 50.00, qty 2 -> subtotal 100.00.
    fill_cart(&app, customer.id, dec!(50.00), 2).await;

    let detail = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("WELCOME10")))
        .await
        .unwrap();

    assert_eq!(detail.order.subtotal, dec!(100.00));
    assert_eq!(detail.order.tax_amount, dec!(10.00));
    assert_eq!(detail.order.shipping_cost, dec!(50.00));
    assert_eq!(detail.order.discount_amount, dec!(10.00));
    assert_eq!(detail.order.total_amount, dec!(150.00));

    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert_eq!(detail.order.payment_status, PaymentStatus::Pending);
    assert!(detail.order.order_number.starts_with("ORD-"));

    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].quantity, 2);
    assert_eq!(detail.items[0].total, dec!(100.00));
    assert_eq!(detail.items[0].product_name, "Linen Shirt");

    assert_eq!(detail.addresses.len(), 2);
    assert!(detail.address(AddressKind::Shipping).is_some());
    assert!(detail.address(AddressKind::Billing).is_some());
    assert_eq!(
        detail.address(AddressKind::Shipping).unwrap().full_name(),
        "Jordan Reyes"
    );

    let coupon = detail.coupon.as_ref().expect("coupon should be loaded");
    assert_eq!(coupon.usage_count, 1);

    // Cart ends with zero items but the row persists.
    let cart = app
        .state
        .carts
        .get_cart(&CartOwner::Customer(customer.id))
        .await
        .unwrap();
    assert!(cart.is_empty());

    let usages = CouponUsage::find().all(&*app.state.db).await.unwrap();
    assert_eq!(usages.len(), 1);
    assert_eq!(usages[0].order_id, detail.order.id);
    assert_eq!(usages[0].customer_id, customer.id);
}

#[tokio::test]
async fn checkout_without_coupon_has_zero_discount() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    fill_cart(&app, customer.id, dec!(20.00), 1).await;

    let detail = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, None))
        .await
        .unwrap();

    assert_eq!(detail.order.discount_amount, rust_decimal::Decimal::ZERO);
    // 20 + 2 tax + 50 shipping
    assert_eq!(detail.order.total_amount, dec!(72.00));
    assert!(detail.coupon.is_none());
}

#[tokio::test]
async fn fixed_coupon_never_discounts_below_zero() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    common::insert_coupon(
        &app,
        common::coupon_fixture("BIGFIXED", DiscountType::Fixed, dec!(100.00)),
    )
    .await;
    fill_cart(&app, customer.id, dec!(30.00), 1).await;

    let detail = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("BIGFIXED")))
        .await
        .unwrap();

    // Discount capped at the 30.00 subtotal: 30 + 3 + 50 - 30.
    assert_eq!(detail.order.discount_amount, dec!(30.00));
    assert_eq!(detail.order.total_amount, dec!(53.00));
}

#[tokio::test]
async fn minimum_purchase_is_stored_but_not_enforced() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    let mut coupon = common::coupon_fixture("SUMMER20", DiscountType::Percentage, dec!(20));
    coupon.minimum_purchase = sea_orm::Set(Some(dec!(100.00)));
    common::insert_coupon(&app, coupon).await;

    // Subtotal 80.00 sits below the minimum; checkout still succeeds.
    fill_cart(&app, customer.id, dec!(80.00), 1).await;

    let detail = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("SUMMER20")))
        .await
        .unwrap();

    assert_eq!(detail.order.discount_amount, dec!(16.00));
    assert_eq!(detail.order.total_amount, dec!(122.00));
}

#[tokio::test]
async fn checkout_fails_on_missing_or_empty_cart() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;

    // No cart at all.
    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, None))
        .await;
    assert_matches!(result, Err(ServiceError::EmptyCart));

    // Cart exists but has no items.
    app.state
        .carts
        .resolve_cart(&CartOwner::Customer(customer.id))
        .await
        .unwrap();
    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, None))
        .await;
    assert_matches!(result, Err(ServiceError::EmptyCart));
}

#[tokio::test]
async fn checkout_fails_on_unknown_coupon() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    fill_cart(&app, customer.id, dec!(10.00), 1).await;

    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("NOPE")))
        .await;

    assert_matches!(result, Err(ServiceError::CouponNotFound(code)) if code == "NOPE");

    // The failed checkout must not have touched the cart.
    let cart = app
        .state
        .carts
        .get_cart(&CartOwner::Customer(customer.id))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn checkout_fails_on_inactive_coupon() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    let mut coupon = common::coupon_fixture("DORMANT", DiscountType::Percentage, dec!(10));
    coupon.is_active = sea_orm::Set(false);
    common::insert_coupon(&app, coupon).await;
    fill_cart(&app, customer.id, dec!(10.00), 1).await;

    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("DORMANT")))
        .await;

    assert_matches!(result, Err(ServiceError::CouponNotUsable(_)));
}

#[tokio::test]
async fn checkout_fails_on_expired_coupon() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    let mut coupon = common::coupon_fixture("LASTYEAR", DiscountType::Percentage, dec!(10));
    coupon.valid_until = sea_orm::Set(Some(
        chrono::Utc::now().date_naive() - chrono::Duration::days(1),
    ));
    common::insert_coupon(&app, coupon).await;
    fill_cart(&app, customer.id, dec!(10.00), 1).await;

    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("LASTYEAR")))
        .await;

    assert_matches!(result, Err(ServiceError::CouponNotUsable(_)));
}

#[tokio::test]
async fn coupon_usage_ceiling_holds() {
    let app = TestApp::new().await;
    let mut coupon = common::coupon_fixture("ONETIME", DiscountType::Percentage, dec!(10));
    coupon.usage_limit = sea_orm::Set(Some(1));
    let coupon = common::insert_coupon(&app, coupon).await;

    let alice = common::seed_customer(&app).await;
    fill_cart(&app, alice.id, dec!(10.00), 1).await;
    app.state
        .orders
        .create_order(common::checkout_input(alice.id, Some("ONETIME")))
        .await
        .unwrap();

    let bob = common::seed_customer(&app).await;
    fill_cart(&app, bob.id, dec!(10.00), 1).await;
    let result = app
        .state
        .orders
        .create_order(common::checkout_input(bob.id, Some("ONETIME")))
        .await;

    assert_matches!(result, Err(ServiceError::CouponNotUsable(_)));

    let stored = Coupon::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 1);
}

#[tokio::test]
async fn per_customer_usage_limit_holds() {
    let app = TestApp::new().await;
    let mut coupon = common::coupon_fixture("LOYAL1", DiscountType::Percentage, dec!(10));
    coupon.usage_limit_per_user = sea_orm::Set(Some(1));
    common::insert_coupon(&app, coupon).await;

    let customer = common::seed_customer(&app).await;
    fill_cart(&app, customer.id, dec!(10.00), 1).await;
    app.state
        .orders
        .create_order(common::checkout_input(customer.id, Some("LOYAL1")))
        .await
        .unwrap();

    fill_cart(&app, customer.id, dec!(10.00), 1).await;
    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("LOYAL1")))
        .await;

    assert_matches!(result, Err(ServiceError::CouponNotUsable(_)));
}

#[tokio::test]
async fn failed_checkout_rolls_back_everything() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    let coupon = common::insert_coupon(
        &app,
        common::coupon_fixture("ROLLBACK", DiscountType::Percentage, dec!(10)),
    )
    .await;

    let product = common::seed_product(&app, dec!(25.00), None).await;
    app.state
        .carts
        .add_item(
            &CartOwner::Customer(customer.id),
            AddItemInput {
                product_id: product.id,
                variant_id: None,
                quantity: 2,
            },
        )
        .await
        .unwrap();

    // Fault injection: deleting the product makes the order-item name
    // snapshot fail midway through the transaction, after the order row
    // insert.
    Product::delete_by_id(product.id)
        .exec(&*app.state.db)
        .await
        .unwrap();

    let result = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("ROLLBACK")))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));

    // No order, no usage, counter untouched, cart exactly as before.
    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert!(orders.is_empty());

    let usages = CouponUsage::find().all(&*app.state.db).await.unwrap();
    assert!(usages.is_empty());

    let stored = Coupon::find_by_id(coupon.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 0);

    let cart = app
        .state
        .carts
        .get_cart(&CartOwner::Customer(customer.id))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn one_cart_produces_exactly_one_order() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    fill_cart(&app, customer.id, dec!(40.00), 1).await;

    let first = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, None))
        .await;
    let second = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, None))
        .await;

    assert!(first.is_ok());
    assert_matches!(second, Err(ServiceError::EmptyCart));

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn concurrent_checkouts_spend_the_cart_once() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    fill_cart(&app, customer.id, dec!(40.00), 1).await;

    let (a, b) = tokio::join!(
        app.state
            .orders
            .create_order(common::checkout_input(customer.id, None)),
        app.state
            .orders
            .create_order(common::checkout_input(customer.id, None)),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);

    let cart = app
        .state
        .carts
        .get_cart(&CartOwner::Customer(customer.id))
        .await
        .unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
async fn order_numbers_are_unique_across_orders() {
    let app = TestApp::new().await;

    let mut numbers = std::collections::HashSet::new();
    for _ in 0..5 {
        let customer = common::seed_customer(&app).await;
        fill_cart(&app, customer.id, dec!(5.00), 1).await;
        let detail = app
            .state
            .orders
            .create_order(common::checkout_input(customer.id, None))
            .await
            .unwrap();
        assert!(numbers.insert(detail.order.order_number.clone()));
    }
}

#[tokio::test]
async fn get_order_loads_items_addresses_and_coupon() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;
    common::insert_coupon(
        &app,
        common::coupon_fixture("RELOAD", DiscountType::Fixed, dec!(5.00)),
    )
    .await;
    fill_cart(&app, customer.id, dec!(15.00), 2).await;

    let created = app
        .state
        .orders
        .create_order(common::checkout_input(customer.id, Some("RELOAD")))
        .await
        .unwrap();

    let loaded = app.state.orders.get_order(created.order.id).await.unwrap();
    assert_eq!(loaded.order.id, created.order.id);
    assert_eq!(loaded.items.len(), 1);
    assert_eq!(loaded.addresses.len(), 2);
    assert_eq!(
        loaded.coupon.as_ref().map(|c| c.code.as_str()),
        Some("RELOAD")
    );

    let by_number = app
        .state
        .orders
        .get_order_by_number(&created.order.order_number)
        .await
        .unwrap();
    assert_eq!(by_number.order.id, created.order.id);

    let missing = app.state.orders.get_order(Uuid::new_v4()).await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn list_orders_pages_newest_first() {
    let app = TestApp::new().await;
    let customer = common::seed_customer(&app).await;

    for _ in 0..3 {
        fill_cart(&app, customer.id, dec!(5.00), 1).await;
        app.state
            .orders
            .create_order(common::checkout_input(customer.id, None))
            .await
            .unwrap();
    }

    let (orders, total) = app
        .state
        .orders
        .list_orders_for_customer(customer.id, 1, 2)
        .await
        .unwrap();

    assert_eq!(total, 3);
    assert_eq!(orders.len(), 2);
}
