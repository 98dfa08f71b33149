use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog product as mirrored from the e-commerce platform. The sku is the
/// identity; re-syncing the same sku replaces the row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub base_price: Decimal,
    pub image_url: String,
    pub inventory: i64,
    pub category: String,
    pub iva_exempt: bool,
}
