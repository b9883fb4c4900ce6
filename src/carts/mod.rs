//! Session cart domain: the mutable per-session cart, its immutable
//! checkout-time snapshot, and the key-value store the cart lives in.

pub mod snapshot;
pub mod store;

pub use snapshot::{CartSnapshot, SnapshotLine};
pub use store::{InMemoryCartStore, RedisCartStore, SessionCartStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::product;

/// One line of the live session cart. Name, code, price and image are cached
/// from the product row at the moment the item was added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub name: String,
    pub code: String,
    pub image_url: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
}

/// The mutable cart held in the session store, keyed by product id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCart {
    pub items: BTreeMap<Uuid, CartLine>,
}

impl SessionCart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Sum of unit price x quantity over all lines.
    pub fn total_price(&self) -> i64 {
        self.items
            .values()
            .map(|line| line.unit_price * i64::from(line.quantity))
            .sum()
    }

    /// Add one unit of a product, caching its display data. Adding a product
    /// already in the cart increments its quantity instead.
    pub fn add(&mut self, product: &product::Model) {
        self.items
            .entry(product.id)
            .and_modify(|line| line.quantity += 1)
            .or_insert_with(|| CartLine {
                name: product.name.clone(),
                code: product.code.clone(),
                image_url: product.image_url.clone(),
                unit_price: product.price,
                quantity: 1,
            });
    }

    /// Increment the quantity of an existing line. Returns false when the
    /// product is not in the cart.
    pub fn increment(&mut self, product_id: Uuid) -> bool {
        match self.items.get_mut(&product_id) {
            Some(line) => {
                line.quantity += 1;
                true
            }
            None => false,
        }
    }

    /// Decrement the quantity of an existing line, never below one.
    pub fn decrement(&mut self, product_id: Uuid) -> bool {
        match self.items.get_mut(&product_id) {
            Some(line) => {
                if line.quantity > 1 {
                    line.quantity -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Remove a line entirely. Returns false when the product is not present.
    pub fn remove(&mut self, product_id: Uuid) -> bool {
        self.items.remove(&product_id).is_some()
    }
}
