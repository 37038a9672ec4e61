//! Row → document coercion for the six catalog files
//!
//! Coercion rules shared by every schema:
//!
//! - Identifier columns are parsed as `i64` after trimming; anything else
//!   is a [`LoadError::MalformedRow`]. Ids are never defaulted, since a
//!   wrong id would silently corrupt grouping.
//! - The literal `"null"` means "no value". A null feature value drops the
//!   row from its product's feature list. A null sale price becomes `"0"`.
//! - `default_style` is true only for exactly `"1"`.
//! - `default_price` is trimmed; every other text column is kept verbatim.

use catalog_common::types::{Feature, FeatureSet, Photo, Product, RelatedSet, Sku, StyleVariant};
use std::collections::BTreeMap;

use crate::error::{LoadError, Result};
use crate::grouping::Group;
use crate::sink::{AppendField, WriteOperation};
use crate::source::Row;

const NULL_SENTINEL: &str = "null";

/// Parse an identifier column
pub fn parse_id(row: &Row, column: &str) -> Result<i64> {
    let raw = row.require(column)?;
    raw.trim().parse::<i64>().map_err(|_| {
        LoadError::malformed(row.line(), column, format!("is not an integer: {raw:?}"))
    })
}

fn text(row: &Row, column: &str) -> Result<String> {
    row.require(column).map(str::to_string)
}

fn insert<T: serde::Serialize>(document: &T) -> Result<WriteOperation> {
    Ok(WriteOperation::Insert(serde_json::to_value(document)?))
}

// ============================================================================
// product.csv
// ============================================================================

pub fn product(row: &Row) -> Result<Product> {
    Ok(Product {
        id: parse_id(row, "id")?,
        name: text(row, "name")?,
        slogan: text(row, "slogan")?,
        description: text(row, "description")?,
        category: text(row, "category")?,
        default_price: row.require("default_price")?.trim().to_string(),
    })
}

pub fn product_insert(row: &Row) -> Result<WriteOperation> {
    insert(&product(row)?)
}

// ============================================================================
// features.csv (grouped by product_id)
// ============================================================================

/// Parent key plus the feature, or `None` when the value is `"null"`
pub fn feature(row: &Row) -> Result<(i64, Option<Feature>)> {
    let product_id = parse_id(row, "product_id")?;
    let value = row.require("value")?;
    if value == NULL_SENTINEL {
        return Ok((product_id, None));
    }

    Ok((
        product_id,
        Some(Feature::new(row.require("feature")?, value)),
    ))
}

pub fn feature_set(group: Group<Feature>) -> FeatureSet {
    FeatureSet {
        product_id: group.key,
        features: group.items,
    }
}

pub fn feature_set_insert(group: Group<Feature>) -> Result<WriteOperation> {
    insert(&feature_set(group))
}

// ============================================================================
// related.csv (grouped by current_product_id)
// ============================================================================

pub fn related(row: &Row) -> Result<(i64, Option<i64>)> {
    Ok((
        parse_id(row, "current_product_id")?,
        Some(parse_id(row, "related_product_id")?),
    ))
}

pub fn related_set(group: Group<i64>) -> RelatedSet {
    RelatedSet {
        product_id: group.key,
        related_products: group.items,
    }
}

pub fn related_set_insert(group: Group<i64>) -> Result<WriteOperation> {
    insert(&related_set(group))
}

// ============================================================================
// styles.csv
// ============================================================================

pub fn style(row: &Row) -> Result<StyleVariant> {
    let sale_price = row.require("sale_price")?;

    Ok(StyleVariant {
        product_id: parse_id(row, "productId")?,
        style_id: parse_id(row, "id")?,
        is_default: row.require("default_style")? == "1",
        sale_price: if sale_price == NULL_SENTINEL {
            "0".to_string()
        } else {
            sale_price.to_string()
        },
        original_price: text(row, "original_price")?,
        name: text(row, "name")?,
        photos: Vec::new(),
        skus: BTreeMap::new(),
    })
}

pub fn style_insert(row: &Row) -> Result<WriteOperation> {
    insert(&style(row)?)
}

// ============================================================================
// photos.csv / skus.csv (keyed appends against product_styles)
// ============================================================================

/// A photo to append to the style `style_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoAppend {
    pub style_id: i64,
    pub photo: Photo,
}

impl PhotoAppend {
    pub fn into_operation(self) -> Result<WriteOperation> {
        Ok(WriteOperation::UpdateAppend {
            style_id: self.style_id,
            field: AppendField::Array("photos"),
            value: serde_json::to_value(&self.photo)?,
        })
    }
}

/// A SKU to add to the style `style_id` under `sku_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuAppend {
    pub style_id: i64,
    pub sku_id: i64,
    pub sku: Sku,
}

impl SkuAppend {
    pub fn into_operation(self) -> Result<WriteOperation> {
        Ok(WriteOperation::UpdateAppend {
            style_id: self.style_id,
            field: AppendField::MapEntry {
                field: "skus",
                key: self.sku_id.to_string(),
            },
            value: serde_json::to_value(&self.sku)?,
        })
    }
}

pub fn photo(row: &Row) -> Result<PhotoAppend> {
    Ok(PhotoAppend {
        style_id: parse_id(row, "styleId")?,
        photo: Photo {
            url: text(row, "url")?,
            thumbnail_url: text(row, "thumbnail_url")?,
        },
    })
}

pub fn photo_append(row: &Row) -> Result<WriteOperation> {
    photo(row)?.into_operation()
}

pub fn sku(row: &Row) -> Result<SkuAppend> {
    Ok(SkuAppend {
        style_id: parse_id(row, "styleId")?,
        sku_id: parse_id(row, "id")?,
        sku: Sku {
            size: text(row, "size")?,
            quantity: text(row, "quantity")?,
        },
    })
}

pub fn sku_append(row: &Row) -> Result<WriteOperation> {
    sku(row)?.into_operation()
}
