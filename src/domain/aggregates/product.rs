//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub description: String,
    pub image: String,
    pub category_id: Option<i64>,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
    pub stock: i32,
    pub is_featured: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub image: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Curated product collection.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Catalogue {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub image: String,
    pub status: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CatalogueWithProducts {
    #[serde(flatten)]
    pub catalogue: Catalogue,
    pub products: Vec<Product>,
}

impl Product {
    pub fn inventory(&self) -> Quantity { Quantity::from_stock(self.stock) }
    pub fn is_in_stock(&self) -> bool { !self.inventory().is_zero() }

    /// Takes `qty` units out of stock, failing without mutation when short.
    pub fn remove_inventory(&mut self, qty: u32) -> Result<(), ProductError> {
        let left = self.inventory().subtract(qty).ok_or(ProductError::InsufficientInventory {
            available: self.inventory().value(),
            requested: qty,
        })?;
        self.stock = left.value() as i32;
        self.touch();
        Ok(())
    }

    pub fn add_inventory(&mut self, qty: u32) {
        self.stock = self.inventory().add(qty).value() as i32;
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Lowercase, hyphen-separated slug derived from a display name.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("Insufficient inventory: available {available}, requested {requested}")]
    InsufficientInventory { available: u32, requested: u32 },
}

#[cfg(test)]
pub(crate) fn sample_product(id: i64, price: Decimal, stock: i32) -> Product {
    let now = Utc::now();
    Product {
        id, name: format!("Product {id}"), price, description: String::new(), image: String::new(),
        category_id: Some(1), colors: vec!["Camel".into()], sizes: vec!["Standard".into()], stock,
        is_featured: false, is_active: true, created_at: now, updated_at: now,
    }
}
