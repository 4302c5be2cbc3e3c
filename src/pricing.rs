//! Inventory-sensitive pricing.
//!
//! Every item has a reference price (midpoint of clamped external quotes). The
//! unit price decays with the number of units the bot already holds:
//!
//! ```text
//! unit(n) = max(floor(rarity), reference * exp(-n² / 20))
//! ```
//!
//! Buying evaluates at `n` then increments the simulated stock. Selling first
//! decrements (never below 1) and applies a 15% markup. Pricing never touches
//! the real ledger; stock is passed in by value.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::catalog::{ItemCatalog, Rarity};
use crate::types::{Gold, Side};

/// Markup applied to the decay curve when the bot sells
pub const SELL_MARKUP: f64 = 1.15;

/// Divisor in the stock decay exponent
const DECAY_DIVISOR: f64 = 20.0;

/// Reference price from an external buy/sell quote pair.
///
/// Both quotes are clamped into the rarity's range, then averaged (integer midpoint).
pub fn reference_from_quotes(rarity: Rarity, buy: Gold, sell: Gold) -> Gold {
    let (lower, upper) = rarity.reference_range();
    let buy = buy.clamp(lower, upper);
    let sell = sell.clamp(lower, upper);
    (buy + sell) / 2
}

/// Price of one unit at stock level `stock`, truncated to whole gold
#[inline]
fn unit_price(floor: Gold, reference: Gold, stock: u32, markup: f64) -> Gold {
    let n = stock as f64;
    let curve = reference as f64 * (-(n * n) / DECAY_DIVISOR).exp() * markup;
    floor.max(curve as Gold)
}

/// Shared reference price table, refreshed by the price feed
#[derive(Debug, Default)]
pub struct PriceTable {
    prices: RwLock<FxHashMap<String, Gold>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference(&self, item: &str) -> Option<Gold> {
        self.prices.read().get(item).copied()
    }

    pub fn set_reference(&self, item: &str, price: Gold) {
        self.prices.write().insert(item.to_string(), price);
    }

    /// Replace many entries under one write lock
    pub fn extend(&self, entries: impl IntoIterator<Item = (String, Gold)>) {
        let mut prices = self.prices.write();
        for (item, price) in entries {
            prices.insert(item, price);
        }
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

/// Pricing function bound to a catalog and a price table
#[derive(Debug, Clone)]
pub struct PricingEngine {
    catalog: Arc<ItemCatalog>,
    prices: Arc<PriceTable>,
}

impl PricingEngine {
    pub fn new(catalog: Arc<ItemCatalog>, prices: Arc<PriceTable>) -> Self {
        Self { catalog, prices }
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Reference price, falling back to the rarity floor when no quote was ingested
    pub fn base_value(&self, item: &str) -> Gold {
        match self.catalog.rarity(item) {
            Some(rarity) => self.prices.reference(item).unwrap_or(rarity.floor()),
            None => 0,
        }
    }

    /// Total price of `quantity` units starting from `stock` units on hand.
    ///
    /// Items outside the catalog price at 0; callers validate names first.
    pub fn price(&self, item: &str, quantity: u32, side: Side, stock: u32) -> Gold {
        let Some(rarity) = self.catalog.rarity(item) else {
            return 0;
        };
        let floor = rarity.floor();
        let reference = self.prices.reference(item).unwrap_or(0);

        let mut stocked = stock;
        let mut total: Gold = 0;
        for _ in 0..quantity {
            match side {
                Side::Buy => {
                    total += unit_price(floor, reference, stocked, 1.0);
                    stocked = stocked.saturating_add(1);
                }
                Side::Sell => {
                    if stocked > 1 {
                        stocked -= 1;
                    }
                    total += unit_price(floor, reference, stocked, SELL_MARKUP);
                }
            }
        }
        total
    }

    /// Whether selling one more unit would only fetch the rarity floor
    pub fn is_at_floor(&self, item: &str, stock: u32) -> bool {
        match self.catalog.rarity(item) {
            Some(rarity) => self.price(item, 1, Side::Sell, stock) <= rarity.floor(),
            None => false,
        }
    }
}
