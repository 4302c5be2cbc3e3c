//! Inventory ledger: the bot's stock, card instances and gold.
//!
//! The ledger is the only state shared between the bot loop and a running
//! trade session. A session reads it freely but mutates it only through
//! [`Ledger::apply_settlement`], which validates the whole settlement before
//! applying any part of it.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::ItemCatalog;
use crate::types::{CardInstance, Gold, OfferSide};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("settlement needs {needed}g but only {available}g is held")]
    InsufficientGold { needed: Gold, available: Gold },

    #[error("settlement gives away {needed}x {item} but only {available} held")]
    InsufficientStock { item: String, needed: u32, available: u32 },
}

/// Final contents of both sides of a mutually accepted trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub partner: String,
    pub mine: OfferSide,
    pub theirs: OfferSide,
}

impl Settlement {
    /// Gold the ledger gains (negative when paying out)
    pub fn net_gold(&self) -> Gold {
        self.theirs.gold - self.mine.gold
    }
}

/// What changed in the holdings because of a settlement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    /// Items we held none of before
    pub newly_stocked: Vec<String>,
    /// Items we no longer hold any of
    pub sold_out: Vec<String>,
}

/// Read/write interface to the bot's holdings
pub trait Ledger: Send + Sync {
    fn gold(&self) -> Gold;

    /// Gold the bot is willing to put into trades
    fn gold_for_trade(&self) -> Gold;

    /// Units on hand; `None` when the item is not tracked at all
    fn stock(&self, item: &str) -> Option<u32>;

    /// Ids of tradable instances of `item`, in library order
    fn tradable_cards(&self, item: &str) -> Vec<u64>;

    /// Items with at least one unit, with counts
    fn holdings(&self) -> BTreeMap<String, u32>;

    fn library(&self) -> Vec<CardInstance>;

    /// Apply a mutually accepted trade as one step
    fn apply_settlement(&self, settlement: &Settlement) -> Result<SettlementReport, LedgerError>;

    /// Replace card instances (and derived stock) with the server's view
    fn sync_library(&self, cards: Vec<CardInstance>);

    fn sync_gold(&self, gold: Gold);
}

#[derive(Debug, Default)]
struct LedgerState {
    gold: Gold,
    stock: BTreeMap<String, u32>,
    library: Vec<CardInstance>,
}

/// In-memory ledger seeded with every catalog item at zero stock
#[derive(Debug)]
pub struct InventoryLedger {
    state: RwLock<LedgerState>,
    gold_reserve: Gold,
}

impl InventoryLedger {
    pub fn new(catalog: &ItemCatalog, gold_reserve: Gold) -> Self {
        let stock = catalog.names().map(|n| (n.to_string(), 0)).collect();
        Self {
            state: RwLock::new(LedgerState {
                gold: 0,
                stock,
                library: Vec::new(),
            }),
            gold_reserve,
        }
    }

    /// Ledger with an initial library and gold balance
    pub fn with_contents(catalog: &ItemCatalog, gold_reserve: Gold, cards: Vec<CardInstance>, gold: Gold) -> Self {
        let ledger = Self::new(catalog, gold_reserve);
        ledger.sync_library(cards);
        ledger.sync_gold(gold);
        ledger
    }
}

impl Ledger for InventoryLedger {
    fn gold(&self) -> Gold {
        self.state.read().gold
    }

    fn gold_for_trade(&self) -> Gold {
        (self.state.read().gold - self.gold_reserve).max(0)
    }

    fn stock(&self, item: &str) -> Option<u32> {
        self.state.read().stock.get(item).copied()
    }

    fn tradable_cards(&self, item: &str) -> Vec<u64> {
        self.state
            .read()
            .library
            .iter()
            .filter(|c| c.tradable && c.item == item)
            .map(|c| c.id)
            .collect()
    }

    fn holdings(&self) -> BTreeMap<String, u32> {
        self.state
            .read()
            .stock
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(k, &n)| (k.clone(), n))
            .collect()
    }

    fn library(&self) -> Vec<CardInstance> {
        self.state.read().library.clone()
    }

    fn apply_settlement(&self, settlement: &Settlement) -> Result<SettlementReport, LedgerError> {
        let received = settlement.theirs.counts();
        let given = settlement.mine.counts();

        let mut state = self.state.write();

        // Validate everything before touching anything
        let new_gold = state.gold + settlement.net_gold();
        if new_gold < 0 {
            return Err(LedgerError::InsufficientGold {
                needed: settlement.mine.gold,
                available: state.gold + settlement.theirs.gold,
            });
        }
        for (item, &n) in &given {
            let held = state.stock.get(item).copied().unwrap_or(0) + received.get(item).copied().unwrap_or(0);
            if held < n {
                return Err(LedgerError::InsufficientStock {
                    item: item.clone(),
                    needed: n,
                    available: held,
                });
            }
        }

        let mut report = SettlementReport::default();
        state.gold = new_gold;
        for (item, &n) in &received {
            let entry = state.stock.entry(item.clone()).or_insert(0);
            if *entry == 0 {
                report.newly_stocked.push(item.clone());
            }
            *entry += n;
        }
        for (item, &n) in &given {
            let entry = state.stock.entry(item.clone()).or_insert(0);
            *entry -= n;
            if *entry == 0 {
                report.sold_out.push(item.clone());
            }
        }

        let given_ids: Vec<u64> = settlement.mine.cards.iter().map(|c| c.id).collect();
        state.library.retain(|c| !given_ids.contains(&c.id));
        state.library.extend(settlement.theirs.cards.iter().map(|c| CardInstance {
            id: c.id,
            item: c.item.clone(),
            tradable: true,
        }));

        info!(
            "[LEDGER] Settled with {}: +{} cards, -{} cards, net {:+}g (now {}g)",
            settlement.partner,
            settlement.theirs.cards.len(),
            settlement.mine.cards.len(),
            settlement.net_gold(),
            state.gold
        );
        Ok(report)
    }

    fn sync_library(&self, cards: Vec<CardInstance>) {
        let mut state = self.state.write();
        for count in state.stock.values_mut() {
            *count = 0;
        }
        for card in &cards {
            *state.stock.entry(card.item.clone()).or_insert(0) += 1;
        }
        state.library = cards;
    }

    fn sync_gold(&self, gold: Gold) {
        if gold < 0 {
            warn!("[LEDGER] Ignoring negative gold sync: {}", gold);
            return;
        }
        self.state.write().gold = gold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, Rarity};
    use crate::types::OfferedCard;

    fn catalog() -> ItemCatalog {
        ItemCatalog::new(vec![
            CatalogEntry { name: "Bear".to_string(), rarity: Rarity::Common },
            CatalogEntry { name: "Dragon".to_string(), rarity: Rarity::Rare },
        ])
        .unwrap()
    }

    fn card(id: u64, item: &str) -> CardInstance {
        CardInstance { id, item: item.to_string(), tradable: true }
    }

    fn offered(id: u64, item: &str) -> OfferedCard {
        OfferedCard { id, item: item.to_string() }
    }

    #[test]
    fn test_seeded_with_catalog() {
        let ledger = InventoryLedger::new(&catalog(), 0);
        assert_eq!(ledger.stock("Bear"), Some(0));
        assert_eq!(ledger.stock("Unknown"), None);
    }

    #[test]
    fn test_sync_library_derives_stock() {
        let ledger = InventoryLedger::new(&catalog(), 0);
        ledger.sync_library(vec![
            card(1, "Bear"),
            card(2, "Bear"),
            CardInstance { id: 3, item: "Dragon".to_string(), tradable: false },
        ]);
        assert_eq!(ledger.stock("Bear"), Some(2));
        assert_eq!(ledger.stock("Dragon"), Some(1));
        assert!(ledger.tradable_cards("Dragon").is_empty());
        assert_eq!(ledger.tradable_cards("Bear"), vec![1, 2]);
    }

    #[test]
    fn test_gold_reserve() {
        let ledger = InventoryLedger::with_contents(&catalog(), 100, vec![], 250);
        assert_eq!(ledger.gold_for_trade(), 150);
        ledger.sync_gold(50);
        assert_eq!(ledger.gold_for_trade(), 0);
    }

    #[test]
    fn test_settlement_applies_net() {
        let ledger = InventoryLedger::with_contents(&catalog(), 0, vec![card(1, "Bear")], 500);
        let settlement = Settlement {
            partner: "alice".to_string(),
            mine: OfferSide { cards: vec![offered(1, "Bear")], gold: 120, accepted: true },
            theirs: OfferSide { cards: vec![offered(9, "Dragon")], gold: 20, accepted: true },
        };
        let report = ledger.apply_settlement(&settlement).unwrap();
        assert_eq!(ledger.gold(), 400);
        assert_eq!(ledger.stock("Bear"), Some(0));
        assert_eq!(ledger.stock("Dragon"), Some(1));
        assert_eq!(report.newly_stocked, vec!["Dragon".to_string()]);
        assert_eq!(report.sold_out, vec!["Bear".to_string()]);
        assert_eq!(ledger.tradable_cards("Dragon"), vec![9]);
    }

    #[test]
    fn test_settlement_rejected_without_partial_mutation() {
        let ledger = InventoryLedger::with_contents(&catalog(), 0, vec![card(1, "Bear")], 100);
        let settlement = Settlement {
            partner: "alice".to_string(),
            mine: OfferSide {
                cards: vec![offered(1, "Bear"), offered(2, "Bear")],
                gold: 0,
                accepted: true,
            },
            theirs: OfferSide { cards: vec![offered(9, "Dragon")], gold: 10, accepted: true },
        };
        let err = ledger.apply_settlement(&settlement).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { needed: 2, available: 1, .. }));
        assert_eq!(ledger.gold(), 100);
        assert_eq!(ledger.stock("Dragon"), Some(0));

        let broke = Settlement {
            partner: "alice".to_string(),
            mine: OfferSide { cards: vec![], gold: 500, accepted: true },
            theirs: OfferSide::default(),
        };
        assert!(matches!(ledger.apply_settlement(&broke), Err(LedgerError::InsufficientGold { .. })));
        assert_eq!(ledger.gold(), 100);
    }
}
