//! Storage record types for the trade log.

use std::collections::BTreeMap;

use crate::inventory::Settlement;
use crate::types::Gold;

/// One settled trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    pub timestamp_secs: i64,
    pub partner: String,

    // Gold on each side of the window
    pub my_gold: Gold,
    pub their_gold: Gold,

    // Card values at the moment of settlement
    pub my_value: Gold,
    pub their_value: Gold,

    /// Item -> units we received
    pub received: BTreeMap<String, u32>,
    /// Item -> units we gave away
    pub given: BTreeMap<String, u32>,
}

impl TradeRecord {
    pub fn from_settlement(settlement: &Settlement, their_value: Gold, my_value: Gold) -> Self {
        Self {
            timestamp_secs: chrono::Utc::now().timestamp(),
            partner: settlement.partner.clone(),
            my_gold: settlement.mine.gold,
            their_gold: settlement.theirs.gold,
            my_value,
            their_value,
            received: settlement.theirs.counts(),
            given: settlement.mine.counts(),
        }
    }

    /// Gold the bot gained (negative when it paid)
    pub fn net_gold(&self) -> Gold {
        self.their_gold - self.my_gold
    }
}

/// End of a session that did not settle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub timestamp_secs: i64,
    pub partner: String,
    /// Final state name, e.g. "TimedOut"
    pub outcome: String,
    pub detail: Option<String>,
}

impl SessionRecord {
    pub fn new(partner: &str, outcome: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            timestamp_secs: chrono::Utc::now().timestamp(),
            partner: partner.to_string(),
            outcome: outcome.into(),
            detail,
        }
    }
}
