//! Fuzzy item-name resolution for free-text chat input.
//!
//! Players type partial names and typos; the resolver maps them onto catalog
//! names. It is lossy on purpose: an unresolved input is returned unchanged
//! and callers decide validity by catalog membership.

use std::sync::Arc;

use crate::catalog::ItemCatalog;

/// Largest edit distance accepted as a typo
pub const MAX_EDIT_DISTANCE: usize = 2;

/// Levenshtein distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[derive(Debug, Clone)]
pub struct ItemResolver {
    catalog: Arc<ItemCatalog>,
}

impl ItemResolver {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// Map free text onto a catalog name.
    ///
    /// 1. closest name within [`MAX_EDIT_DISTANCE`] (case-insensitive); ties go
    ///    to the shorter name, then the lexicographically smaller one
    /// 2. unless that match is exact: first name with a whole word equal to the input
    /// 3. then: first name containing the input
    /// 4. otherwise the fuzzy match, or the input unchanged
    pub fn resolve(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }
        let needle = input.to_lowercase();

        let mut best: Option<(usize, &str)> = None;
        for name in self.catalog.names() {
            let dist = levenshtein(&needle, &name.to_lowercase());
            if dist > MAX_EDIT_DISTANCE {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_dist, best_name)) => {
                    (dist, name.len(), name) < (best_dist, best_name.len(), best_name)
                }
            };
            if better {
                best = Some((dist, name));
            }
        }

        if let Some((0, name)) = best {
            return name.to_string();
        }

        for name in self.catalog.names() {
            if name.split(' ').any(|word| word.to_lowercase() == needle) {
                return name.to_string();
            }
        }

        for name in self.catalog.names() {
            if name.to_lowercase().contains(&needle) {
                return name.to_string();
            }
        }

        match best {
            Some((_, name)) => name.to_string(),
            None => input.to_string(),
        }
    }

    /// Resolve and keep the result only if it names a catalog item
    pub fn resolve_known(&self, input: &str) -> Option<String> {
        let name = self.resolve(input);
        self.catalog.contains(&name).then_some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, Rarity};

    fn resolver(names: &[&str]) -> ItemResolver {
        let entries = names
            .iter()
            .map(|n| CatalogEntry { name: n.to_string(), rarity: Rarity::Common })
            .collect();
        ItemResolver::new(Arc::new(ItemCatalog::new(entries).unwrap()))
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("wolfrider", "wolf rider"), 1);
    }

    #[test]
    fn test_typo_within_distance_resolves() {
        let r = resolver(&["Wolf Rider", "Bear"]);
        assert_eq!(r.resolve("wolfrider"), "Wolf Rider");
        assert_eq!(r.resolve("WOLF RIDER"), "Wolf Rider");
        assert_eq!(r.resolve("baer"), "Bear");
    }

    #[test]
    fn test_unresolvable_input_returned_unchanged() {
        let r = resolver(&["Wolf Rider", "Bear"]);
        assert_eq!(r.resolve("xyz123"), "xyz123");
        assert_eq!(r.resolve_known("xyz123"), None);
    }

    #[test]
    fn test_whole_word_beats_substring() {
        let r = resolver(&["Riderless Horse", "Wolf Rider"]);
        assert_eq!(r.resolve("rider"), "Wolf Rider");
    }

    #[test]
    fn test_substring_first_match_in_catalog_order() {
        let r = resolver(&["Ancient Golem", "Golem Smith"]);
        assert_eq!(r.resolve("olem"), "Ancient Golem");
    }

    #[test]
    fn test_tie_break_shortest_then_lexicographic() {
        let r = resolver(&["Cart", "Bat", "Cat"]);
        // "Bat" and "Cat" are both distance 1 from "hat"; "Cart" is 2
        assert_eq!(r.resolve("hat"), "Bat");
    }

    #[test]
    fn test_exact_match_wins_over_word_match() {
        let r = resolver(&["Bear Tamer", "Bear"]);
        assert_eq!(r.resolve("bear"), "Bear");
    }

    #[test]
    fn test_empty_input() {
        let r = resolver(&["Bear"]);
        assert_eq!(r.resolve(""), "");
    }
}
