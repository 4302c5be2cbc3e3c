//! Core type definitions shared by the trading engine and its transport.
//!
//! This module provides the chat/trade event model delivered by the transport,
//! the protocol requests the bot sends back, and the normalised trade snapshot
//! consumed by a trade session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{TRADE_ROOM_PREFIX, WHISPER_CHANNEL};

/// Gold amounts. Signed so balance differences need no casts.
pub type Gold = i64;

/// Direction of a quote from the bot's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Bot buys from the counterparty
    Buy,
    /// Bot sells to the counterparty
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// === Chat ===

/// One chat line from the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub channel: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            channel: channel.into(),
            text: text.into(),
        }
    }

    #[inline]
    pub fn is_whisper(&self) -> bool {
        self.channel == WHISPER_CHANNEL
    }

    #[inline]
    pub fn is_trade_room(&self) -> bool {
        self.channel.starts_with(TRADE_ROOM_PREFIX)
    }
}

// === Inventory ===

/// A single owned card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInstance {
    pub id: u64,
    pub item: String,
    #[serde(default = "default_tradable")]
    pub tradable: bool,
}

fn default_tradable() -> bool {
    true
}

// === Protocol requests ===

/// Requests the bot sends to the game server through the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum ProtocolRequest {
    TradeInvite {
        profile: String,
    },
    TradeAddCards {
        #[serde(rename = "cardIds")]
        card_ids: Vec<u64>,
    },
    TradeRemoveCard {
        #[serde(rename = "cardId")]
        card_id: u64,
    },
    TradeSetGold {
        gold: Gold,
    },
    TradeAcceptBargain,
    SellCards {
        #[serde(rename = "cardIds")]
        card_ids: Vec<u64>,
    },
    ProfileDataInfo,
    LibraryView,
}

// === Trade views ===

/// A card placed in a trade window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedCard {
    pub id: u64,
    pub item: String,
}

/// One side of a raw trade view as the server reports it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSideView {
    pub name: String,
    #[serde(default)]
    pub cards: Vec<OfferedCard>,
    #[serde(default)]
    pub gold: Gold,
    #[serde(default)]
    pub accepted: bool,
}

/// Raw trade view: inviter and invitee, in server order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeView {
    #[serde(default)]
    pub modified: bool,
    pub from: TradeSideView,
    pub to: TradeSideView,
}

impl TradeView {
    /// Orient the view around the bot: `mine` is whichever side carries our name.
    pub fn normalize(self, bot_name: &str) -> TradeSnapshot {
        let (mine, theirs) = if self.to.name == bot_name {
            (self.to, self.from)
        } else {
            (self.from, self.to)
        };
        TradeSnapshot {
            partner: theirs.name.clone(),
            modified: self.modified,
            mine: OfferSide::from(mine),
            theirs: OfferSide::from(theirs),
        }
    }
}

/// Authoritative contents of one side of the trade window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferSide {
    pub cards: Vec<OfferedCard>,
    pub gold: Gold,
    pub accepted: bool,
}

impl OfferSide {
    /// Item -> quantity
    pub fn counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for card in &self.cards {
            *counts.entry(card.item.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl From<TradeSideView> for OfferSide {
    fn from(view: TradeSideView) -> Self {
        Self {
            cards: view.cards,
            gold: view.gold,
            accepted: view.accepted,
        }
    }
}

/// Trade state normalised to the bot's perspective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeSnapshot {
    pub partner: String,
    pub modified: bool,
    pub mine: OfferSide,
    pub theirs: OfferSide,
}

// === Inbound events ===

/// Everything the transport delivers to the bot, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Chat(ChatMessage),
    /// We were placed in a room (trade rooms are assigned by the server)
    RoomJoined(String),
    /// Answer to our trade invite
    TradeResponse { accepted: bool },
    TradeView(TradeView),
    /// Canonical library contents
    Library(Vec<CardInstance>),
    /// Canonical gold balance
    Gold(Gold),
    /// Connection is gone; the bot must restart
    Disconnected(String),
}
