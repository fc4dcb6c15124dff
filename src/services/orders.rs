use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    db::lock_exclusive_if_supported,
    entities::{
        cart, cart_item, coupon, order, order_address, order_item, product, AddressKind, Cart,
        CartItem, CartItemModel, Coupon, CouponModel, Customer, CustomerModel, Order, OrderAddress,
        OrderAddressModel, OrderItem, OrderItemModel, OrderModel, OrderStatus, PaymentMethod,
        PaymentStatus, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponService,
};

/// Order service: converts a cart into an immutable, priced order.
///
/// `create_order` is the one write path. Everything it touches — the order
/// row, its items and addresses, the coupon usage, and the cart emptying —
/// commits together or not at all; a failed checkout leaves the cart
/// exactly as it was.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Creates an order from the customer's cart.
    ///
    /// The cart row is locked for the duration of the transaction so two
    /// concurrent checkouts of the same cart cannot both spend its items;
    /// the loser observes an empty cart. A supplied coupon is locked and
    /// re-checked inside the transaction, which makes the usage ceiling
    /// hold at the concurrent boundary too.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<OrderDetail, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let backend = txn.get_database_backend();

        let customer = Customer::find_by_id(input.customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", input.customer_id))
            })?;

        // Double-checkout guard: take the cart row lock before reading items.
        let cart = lock_exclusive_if_supported(
            Cart::find().filter(cart::Column::CustomerId.eq(customer.id)),
            backend,
        )
        .one(&txn)
        .await?
        .ok_or(ServiceError::EmptyCart)?;

        let cart_items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        if cart_items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let subtotal: Decimal = cart_items.iter().map(CartItemModel::line_total).sum();

        // Lock the coupon row so the usage ceiling survives concurrent
        // redemptions; eligibility is re-checked under the lock.
        let applied_coupon = match &input.coupon_code {
            Some(code) => {
                let coupon_row = lock_exclusive_if_supported(
                    Coupon::find().filter(coupon::Column::Code.eq(code.clone())),
                    backend,
                )
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::CouponNotFound(code.clone()))?;

                if !CouponService::can_be_used_by_on(&txn, &coupon_row, customer.id).await? {
                    return Err(ServiceError::CouponNotUsable(code.clone()));
                }
                Some(coupon_row)
            }
            None => None,
        };

        let tax_rate = Decimal::from_f64(self.config.default_tax_rate)
            .ok_or_else(|| ServiceError::InternalError("Tax rate is not representable".into()))?;
        let shipping_cost = Decimal::from_f64(self.config.flat_shipping_fee).ok_or_else(|| {
            ServiceError::InternalError("Shipping fee is not representable".into())
        })?;

        let tax_amount = (subtotal * tax_rate).round_dp(2);
        let discount_amount = applied_coupon
            .as_ref()
            .map(|c| c.calculate_discount(subtotal).round_dp(2))
            .unwrap_or(Decimal::ZERO);
        let total_amount = subtotal + tax_amount + shipping_cost - discount_amount;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer.id),
            order_number: Set(generate_order_number()),
            subtotal: Set(subtotal),
            tax_amount: Set(tax_amount),
            shipping_cost: Set(shipping_cost),
            discount_amount: Set(discount_amount),
            total_amount: Set(total_amount),
            coupon_id: Set(applied_coupon.as_ref().map(|c| c.id)),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(input.payment_method),
            payment_reference: Set(None),
            notes: Set(input.notes.clone()),
            confirmed_at: Set(None),
            shipped_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        // Name snapshots for the items: the live product names, frozen now.
        let product_ids: Vec<Uuid> = cart_items.iter().map(|item| item.product_id).collect();
        let product_names: HashMap<Uuid, String> = Product::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut items = Vec::with_capacity(cart_items.len());
        for cart_item in &cart_items {
            let product_name = product_names.get(&cart_item.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", cart_item.product_id))
            })?;

            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(cart_item.product_id),
                variant_id: Set(cart_item.variant_id),
                product_name: Set(product_name.clone()),
                quantity: Set(cart_item.quantity),
                price: Set(cart_item.price),
                total: Set(cart_item.line_total()),
                created_at: Set(now),
            };
            items.push(item.insert(&txn).await?);
        }

        let addresses = vec![
            Self::insert_address(
                &txn,
                order.id,
                AddressKind::Shipping,
                &customer,
                &input.shipping_address,
            )
            .await?,
            Self::insert_address(
                &txn,
                order.id,
                AddressKind::Billing,
                &customer,
                &input.billing_address,
            )
            .await?,
        ];

        let redeemed_coupon = match applied_coupon {
            Some(coupon_row) => Some(
                CouponService::record_usage_on(&txn, coupon_row, customer.id, order.id).await?,
            ),
            None => None,
        };

        // Empty the cart; the cart row itself persists for reuse.
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                total_amount: order.total_amount,
            })
            .await;
        if let Some(coupon_row) = &redeemed_coupon {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: coupon_row.id,
                    order_id: order.id,
                    discount_amount,
                })
                .await;
        }

        info!(
            "Created order {} for customer {}: total {}",
            order.order_number, customer.id, order.total_amount
        );

        Ok(OrderDetail {
            order,
            items,
            addresses,
            coupon: redeemed_coupon,
        })
    }

    /// Loads an order with its items, addresses, and coupon.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Self::load_detail(&*self.db, order).await
    }

    /// Loads an order by its human-readable number.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<OrderDetail, ServiceError> {
        let order = Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        Self::load_detail(&*self.db, order).await
    }

    /// Lists a customer's orders, newest first.
    pub async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }

    async fn insert_address(
        conn: &impl ConnectionTrait,
        order_id: Uuid,
        kind: AddressKind,
        customer: &CustomerModel,
        input: &OrderAddressInput,
    ) -> Result<OrderAddressModel, ServiceError> {
        let address = order_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            kind: Set(kind),
            first_name: Set(customer.first_name.clone()),
            last_name: Set(customer.last_name.clone()),
            street_address: Set(input.street_address.clone()),
            city: Set(input.city.clone()),
            state: Set(input.state.clone()),
            postal_code: Set(input.postal_code.clone()),
            country: Set(input.country.clone()),
            phone: Set(input.phone.clone()),
            created_at: Set(Utc::now()),
        };
        Ok(address.insert(conn).await?)
    }

    async fn load_detail(
        conn: &impl ConnectionTrait,
        order: OrderModel,
    ) -> Result<OrderDetail, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await?;

        let addresses = OrderAddress::find()
            .filter(order_address::Column::OrderId.eq(order.id))
            .all(conn)
            .await?;

        let coupon = match order.coupon_id {
            Some(coupon_id) => Coupon::find_by_id(coupon_id).one(conn).await?,
            None => None,
        };

        Ok(OrderDetail {
            order,
            items,
            addresses,
            coupon,
        })
    }
}

fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("ORD-{}", suffix)
}

/// Input for creating an order from the customer's cart
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderInput {
    pub customer_id: Uuid,
    pub payment_method: PaymentMethod,
    #[validate]
    pub shipping_address: OrderAddressInput,
    #[validate]
    pub billing_address: OrderAddressInput,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

/// Address payload copied onto the order
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderAddressInput {
    #[validate(length(min = 1, message = "Street address is required"))]
    pub street_address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
}

/// Fully loaded order for the caller to serialize
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub addresses: Vec<OrderAddressModel>,
    pub coupon: Option<CouponModel>,
}

impl OrderDetail {
    pub fn address(&self, kind: AddressKind) -> Option<&OrderAddressModel> {
        self.addresses.iter().find(|a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_number_has_prefix_and_length() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD-"));
        assert_eq!(number.len(), "ORD-".len() + 12);
        assert!(number[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn order_numbers_do_not_repeat() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert_ne!(a, b);
    }

    #[test]
    fn total_combines_tax_shipping_and_discount() {
        let subtotal = dec!(100.00);
        let tax_amount = (subtotal * dec!(0.10)).round_dp(2);
        let shipping_cost = dec!(50.00);
        let discount_amount = dec!(10.00);

        let total = subtotal + tax_amount + shipping_cost - discount_amount;

        assert_eq!(total, dec!(150.00));
    }

    #[test]
    fn tax_rounds_to_cents() {
        let subtotal = dec!(99.99);
        let tax_amount = (subtotal * dec!(0.10)).round_dp(2);
        assert_eq!(tax_amount, dec!(10.00));
    }

    #[test]
    fn address_input_requires_core_fields() {
        let input = OrderAddressInput {
            street_address: "".to_string(),
            city: "Amman".to_string(),
            state: None,
            postal_code: "11118".to_string(),
            country: "JO".to_string(),
            phone: "+962790000000".to_string(),
        };
        assert!(input.validate().is_err());
    }
}
