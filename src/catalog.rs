//! Static item catalog: every tradeable item name with its rarity tier.
//!
//! Loaded once at startup and shared immutably (`Arc<ItemCatalog>`).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::types::Gold;

/// Rarity tier of an item; drives price floors and reference clamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
}

impl Rarity {
    /// Lowest unit price the bot will ever quote
    pub const fn floor(self) -> Gold {
        match self {
            Rarity::Common => 25,
            Rarity::Uncommon => 50,
            Rarity::Rare => 100,
        }
    }

    /// Range external quotes are clamped into before averaging
    pub const fn reference_range(self) -> (Gold, Gold) {
        match self {
            Rarity::Common => (75, 150),
            Rarity::Uncommon => (300, 500),
            Rarity::Rare => (600, 1500),
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rarity::Common => write!(f, "common"),
            Rarity::Uncommon => write!(f, "uncommon"),
            Rarity::Rare => write!(f, "rare"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub rarity: Rarity,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate item '{0}' in catalog")]
    Duplicate(String),

    #[error("catalog is empty")]
    Empty,
}

/// Ordered, immutable set of item names.
///
/// Iteration order is the file order; the resolver relies on it for its
/// "first match wins" steps.
#[derive(Debug, Clone)]
pub struct ItemCatalog {
    entries: Vec<CatalogEntry>,
    /// exact name -> index
    by_name: FxHashMap<String, usize>,
}

impl ItemCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut by_name = FxHashMap::default();
        for (i, entry) in entries.iter().enumerate() {
            if by_name.insert(entry.name.clone(), i).is_some() {
                return Err(CatalogError::Duplicate(entry.name.clone()));
            }
        }
        Ok(Self { entries, by_name })
    }

    /// Parse a JSON array of `{"name": .., "rarity": ..}` objects
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Self::new(entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn rarity(&self, name: &str) -> Option<Rarity> {
        self.by_name.get(name).map(|&i| self.entries[i].rarity)
    }

    /// Item names in catalog order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_order_and_rarity() {
        let catalog = ItemCatalog::from_json(
            r#"[{"name": "Wolf Rider", "rarity": "uncommon"}, {"name": "Bear", "rarity": "common"}]"#,
        )
        .unwrap();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Wolf Rider", "Bear"]);
        assert_eq!(catalog.rarity("Bear"), Some(Rarity::Common));
        assert_eq!(catalog.rarity("bear"), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ItemCatalog::from_json(
            r#"[{"name": "Bear", "rarity": "common"}, {"name": "Bear", "rarity": "rare"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate(name) if name == "Bear"));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(matches!(ItemCatalog::from_json("[]"), Err(CatalogError::Empty)));
    }

    #[test]
    fn test_floors_by_rarity() {
        assert_eq!(Rarity::Common.floor(), 25);
        assert_eq!(Rarity::Uncommon.floor(), 50);
        assert_eq!(Rarity::Rare.floor(), 100);
    }
}
