//! Catalog document types
//!
//! These are the shapes of the documents stored in the catalog collections.
//! The loader builds them from CSV rows; anything reading the catalog back
//! deserializes into the same structs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Collection Names
// ============================================================================

/// One document per product, looked up by `id`.
pub const PRODUCT_INFO: &str = "product_info";

/// One document per product holding its feature list, looked up by `product_id`.
pub const PRODUCT_FEATURES: &str = "product_features";

/// One document per product holding related product ids, looked up by `product_id`.
pub const RELATED_PRODUCTS: &str = "related_products";

/// One document per style, looked up by `product_id` or `style_id`.
pub const PRODUCT_STYLES: &str = "product_styles";

// ============================================================================
// Products
// ============================================================================

/// A product as stored in `product_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slogan: String,
    pub description: String,
    pub category: String,
    /// Kept as text; prices are never re-formatted by the loader
    pub default_price: String,
}

/// A single `feature: value` pair of a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub feature: String,
    pub value: String,
}

impl Feature {
    pub fn new(feature: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            value: value.into(),
        }
    }
}

/// All features of one product, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub product_id: i64,
    pub features: Vec<Feature>,
}

/// Ids of the products related to one product, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedSet {
    pub product_id: i64,
    pub related_products: Vec<i64>,
}

// ============================================================================
// Styles
// ============================================================================

/// A style variant of a product, as stored in `product_styles`.
///
/// Styles are inserted with empty `photos` and `skus`; both are filled in
/// afterwards by keyed appends against `style_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleVariant {
    pub product_id: i64,
    pub style_id: i64,
    #[serde(rename = "default?")]
    pub is_default: bool,
    pub sale_price: String,
    pub original_price: String,
    pub name: String,
    #[serde(default)]
    pub photos: Vec<Photo>,
    /// Keyed by the decimal SKU id
    #[serde(default)]
    pub skus: BTreeMap<String, Sku>,
}

/// A style photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub url: String,
    pub thumbnail_url: String,
}

/// Stock entry of a style in one size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub size: String,
    pub quantity: String,
}
