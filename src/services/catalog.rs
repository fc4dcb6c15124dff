use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{
        product, product_variant, Product, ProductModel, ProductVariant, ProductVariantModel,
    },
    errors::ServiceError,
};

/// Read-mostly catalog access: products with their variants, loaded
/// explicitly rather than lazily on attribute access.
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Loads an active product with its variants.
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductWithVariants, ServiceError> {
        let product = Product::find_by_id(product_id)
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        self.load_variants(product).await
    }

    /// Loads an active product by SKU.
    #[instrument(skip(self))]
    pub async fn get_product_by_sku(&self, sku: &str) -> Result<ProductWithVariants, ServiceError> {
        let product = Product::find()
            .filter(product::Column::Sku.eq(sku))
            .filter(product::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", sku)))?;

        self.load_variants(product).await
    }

    /// Active products flagged for the storefront's featured shelf.
    #[instrument(skip(self))]
    pub async fn list_featured(&self) -> Result<Vec<ProductModel>, ServiceError> {
        Ok(Product::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::IsFeatured.eq(true))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    async fn load_variants(
        &self,
        product: ProductModel,
    ) -> Result<ProductWithVariants, ServiceError> {
        let variants = ProductVariant::find()
            .filter(product_variant::Column::ProductId.eq(product.id))
            .order_by_asc(product_variant::Column::AttributeName)
            .order_by_asc(product_variant::Column::AttributeValue)
            .all(&*self.db)
            .await?;

        Ok(ProductWithVariants { product, variants })
    }
}

/// Product with explicitly loaded variants
#[derive(Debug, Serialize)]
pub struct ProductWithVariants {
    pub product: ProductModel,
    pub variants: Vec<ProductVariantModel>,
}

impl ProductWithVariants {
    /// Price of a specific variant, or the product's display price when no
    /// variant is selected.
    pub fn price_for(&self, variant_id: Option<Uuid>) -> Option<Decimal> {
        match variant_id {
            Some(id) => self
                .variants
                .iter()
                .find(|v| v.id == id)
                .map(|v| v.final_price(self.product.display_price())),
            None => Some(self.product.display_price()),
        }
    }

    /// Variants that can currently be purchased.
    pub fn available_variants(&self) -> impl Iterator<Item = &ProductVariantModel> {
        self.variants.iter().filter(|v| v.is_available())
    }
}
