use crate::{item_key, CoinflipError, ItemRef, ItemStake, Result};
use std::collections::HashMap;
use std::path::Path;

/// Item prices keyed by `type:item_id`.
#[derive(Debug, Clone, Default)]
pub struct PriceList {
    prices: HashMap<String, f64>,
}

impl PriceList {
    pub fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(CoinflipError::pricing("PRICES_FILE is empty"));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CoinflipError::pricing(format!("read {}: {}", path.display(), e))
        })?;
        let prices: HashMap<String, f64> = serde_json::from_str(&content)
            .map_err(|e| CoinflipError::pricing(format!("parse {}: {}", path.display(), e)))?;

        let list = Self::from_map(prices)?;
        tracing::info!("Loaded {} item prices from {}", list.len(), path.display());
        Ok(list)
    }

    pub fn from_map(prices: HashMap<String, f64>) -> Result<Self> {
        for (key, &price) in &prices {
            if key.is_empty() {
                return Err(CoinflipError::pricing("empty key in prices"));
            }
            if !price.is_finite() || price <= 0.0 {
                return Err(CoinflipError::pricing(format!(
                    "invalid price for {:?}: {}",
                    key, price
                )));
            }
        }
        Ok(Self { prices })
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn price(&self, item_type: &str, item_id: &str) -> Option<f64> {
        self.prices.get(&item_key(item_type, item_id)).copied()
    }

    /// Price every item, failing on the first one without a price.
    pub fn resolve(&self, items: &[ItemRef]) -> Result<Vec<ItemStake>> {
        items
            .iter()
            .map(|item| {
                self.price(&item.item_type, &item.item_id)
                    .map(|cost| ItemStake::new(&item.item_type, &item.item_id, cost))
                    .ok_or_else(|| CoinflipError::UnknownItem(item.key()))
            })
            .collect()
    }
}
