//! Storefront entities module
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod coupon_usage;
pub mod customer;
pub mod customer_address;
pub mod order;
pub mod order_address;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod review;
pub mod wishlist;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{DiscountType, Entity as Coupon, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsage, Model as CouponUsageModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use customer_address::{Entity as CustomerAddress, Model as CustomerAddressModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus};
pub use order_address::{AddressKind, Entity as OrderAddress, Model as OrderAddressModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use review::{Entity as Review, Model as ReviewModel};
pub use wishlist::{Entity as Wishlist, Model as WishlistModel};
