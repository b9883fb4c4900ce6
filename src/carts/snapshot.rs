use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::ServiceError;

use super::SessionCart;

/// One frozen line of a cart snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub name: String,
    pub code: String,
    pub image_url: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
}

/// Immutable capture of a session cart, embedded on the order row as JSON.
///
/// Once stored, later mutation of the live cart has no effect on the order:
/// fulfillment builds line items from this value and nothing else.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct CartSnapshot {
    pub items: BTreeMap<Uuid, SnapshotLine>,
}

impl CartSnapshot {
    /// Capture the current session cart. Fails when the cart is empty.
    pub fn capture(cart: &SessionCart) -> Result<Self, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let items = cart
            .items
            .iter()
            .map(|(product_id, line)| {
                (
                    *product_id,
                    SnapshotLine {
                        name: line.name.clone(),
                        code: line.code.clone(),
                        image_url: line.image_url.clone(),
                        unit_price: line.unit_price,
                        quantity: line.quantity,
                    },
                )
            })
            .collect();

        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// The frozen order total: sum of unit price x quantity.
    pub fn total_price(&self) -> i64 {
        self.items
            .values()
            .map(|line| line.unit_price * i64::from(line.quantity))
            .sum()
    }

    /// Integrity check performed at fulfillment time. The snapshot must be
    /// non-empty and every line must carry a positive quantity and a
    /// non-negative price.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.items.is_empty() {
            return Err(ServiceError::CartDataIntegrity(
                "cart snapshot is empty".to_string(),
            ));
        }

        for (product_id, line) in &self.items {
            if line.quantity <= 0 {
                return Err(ServiceError::CartDataIntegrity(format!(
                    "snapshot line for product {} has non-positive quantity {}",
                    product_id, line.quantity
                )));
            }
            if line.unit_price < 0 {
                return Err(ServiceError::CartDataIntegrity(format!(
                    "snapshot line for product {} has negative price {}",
                    product_id, line.unit_price
                )));
            }
        }

        Ok(())
    }
}
