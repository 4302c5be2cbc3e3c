//! SQLite trade log.
//!
//! Settled trades and unsettled session endings are written by a dedicated
//! thread so sessions never wait on disk.

pub mod schema;
pub mod types;
pub mod writer;

pub use types::{SessionRecord, TradeRecord};
pub use writer::{create_trade_log_channel, TradeLogChannel};
