//! Read-only product catalog keyed by barcode.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub barcode: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Lookup table built once at startup. Barcodes are unique.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: Vec<Product>,
    by_barcode: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Result<Self> {
        let mut by_barcode = HashMap::with_capacity(products.len());
        for (idx, product) in products.iter().enumerate() {
            if product.barcode.trim().is_empty() {
                return Err(Error::config(format!(
                    "product '{}' has an empty barcode",
                    product.id
                )));
            }
            if by_barcode.insert(product.barcode.clone(), idx).is_some() {
                return Err(Error::config(format!(
                    "duplicate barcode '{}' in catalog",
                    product.barcode
                )));
            }
        }
        Ok(Self {
            products,
            by_barcode,
        })
    }

    /// Parse a JSON array of products.
    pub fn from_json(json: &str) -> Result<Self> {
        let products: Vec<Product> = serde_json::from_str(json)?;
        Self::new(products)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Exact-match lookup; no normalisation beyond trimming whitespace.
    pub fn lookup(&self, barcode: &str) -> Result<&Product> {
        self.by_barcode
            .get(barcode.trim())
            .map(|&idx| &self.products[idx])
            .ok_or_else(|| Error::not_found(format!("product with barcode '{barcode}'")))
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
