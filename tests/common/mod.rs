//! Shared harness: application state backed by an in-memory SQLite database.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{
        category, coupon, customer, product, product_variant, CategoryModel, CouponModel,
        CustomerModel, DiscountType, PaymentMethod, ProductModel, ProductVariantModel,
    },
    events,
    services::orders::{CreateOrderInput, OrderAddressInput},
    AppState,
};
use uuid::Uuid;

pub struct TestApp {
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.auto_migrate = true;
        // A single connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        let (event_sender, mut event_rx) = events::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let state = AppState::new(Arc::new(pool), Arc::new(cfg), event_sender);

        Self {
            state,
            _event_task: event_task,
        }
    }
}

pub async fn seed_customer(app: &TestApp) -> CustomerModel {
    let id = Uuid::new_v4();
    let customer = customer::ActiveModel {
        id: Set(id),
        first_name: Set("Jordan".to_string()),
        last_name: Set("Reyes".to_string()),
        email: Set(format!("jordan.reyes+{}@example.com", id)),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    customer
        .insert(&*app.state.db)
        .await
        .expect("failed to seed customer")
}

pub async fn seed_category(app: &TestApp) -> CategoryModel {
    let id = Uuid::new_v4();
    let category = category::ActiveModel {
        id: Set(id),
        name: Set("Apparel".to_string()),
        slug: Set(format!("apparel-{}", id)),
        description: Set(None),
        parent_id: Set(None),
        sort_order: Set(0),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    category
        .insert(&*app.state.db)
        .await
        .expect("failed to seed category")
}

pub async fn seed_product(
    app: &TestApp,
    price: Decimal,
    discount_price: Option<Decimal>,
) -> ProductModel {
    let category = seed_category(app).await;
    let id = Uuid::new_v4();
    let product = product::ActiveModel {
        id: Set(id),
        category_id: Set(category.id),
        sku: Set(format!("SKU-{}", id)),
        name: Set("Linen Shirt".to_string()),
        description: Set(None),
        price: Set(price),
        cost: Set(None),
        discount_price: Set(discount_price),
        stock_quantity: Set(25),
        minimum_stock: Set(5),
        image_url: Set(None),
        is_featured: Set(false),
        is_active: Set(true),
        average_rating: Set(Decimal::ZERO),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    product
        .insert(&*app.state.db)
        .await
        .expect("failed to seed product")
}

pub async fn seed_variant(
    app: &TestApp,
    product_id: Uuid,
    attribute_value: &str,
    price_modifier: Decimal,
) -> ProductVariantModel {
    let variant = product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        attribute_name: Set("size".to_string()),
        attribute_value: Set(attribute_value.to_string()),
        stock_quantity: Set(10),
        price_modifier: Set(price_modifier),
        sku_suffix: Set(Some(format!("-{}", attribute_value))),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    variant
        .insert(&*app.state.db)
        .await
        .expect("failed to seed variant")
}

/// Coupon active model with sensible defaults; customize fields before
/// passing to [`insert_coupon`].
pub fn coupon_fixture(
    code: &str,
    discount_type: DiscountType,
    discount_value: Decimal,
) -> coupon::ActiveModel {
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_string()),
        description: Set(None),
        discount_type: Set(discount_type),
        discount_value: Set(discount_value),
        minimum_purchase: Set(None),
        usage_limit: Set(None),
        usage_count: Set(0),
        usage_limit_per_user: Set(None),
        valid_from: Set(None),
        valid_until: Set(None),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    }
}

pub async fn insert_coupon(app: &TestApp, model: coupon::ActiveModel) -> CouponModel {
    model
        .insert(&*app.state.db)
        .await
        .expect("failed to seed coupon")
}

pub fn address_input() -> OrderAddressInput {
    OrderAddressInput {
        street_address: "12 Harbour Street".to_string(),
        city: "Wellington".to_string(),
        state: None,
        postal_code: "6011".to_string(),
        country: "NZ".to_string(),
        phone: "+64211234567".to_string(),
    }
}

pub fn checkout_input(customer_id: Uuid, coupon_code: Option<&str>) -> CreateOrderInput {
    CreateOrderInput {
        customer_id,
        payment_method: PaymentMethod::CreditCard,
        shipping_address: address_input(),
        billing_address: address_input(),
        coupon_code: coupon_code.map(str::to_string),
        notes: None,
    }
}
