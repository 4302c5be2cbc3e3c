//! Automated card trading bot
//!
//! Quotes prices in chat, queues interested players and negotiates one live
//! trade at a time against an inventory-sensitive pricing curve.

pub mod bot;
pub mod catalog;
pub mod command;
pub mod config;
pub mod gateway;
pub mod inventory;
pub mod price_feed;
pub mod pricing;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod transport;
pub mod types;
