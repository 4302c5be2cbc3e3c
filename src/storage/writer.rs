//! Non-blocking SQLite writer using a dedicated thread and mpsc channel.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{error, info, warn};

use super::schema::create_tables;
use super::types::{SessionRecord, TradeRecord};

const BATCH_SIZE: usize = 64;
const BATCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Messages sent to the writer thread.
pub enum StorageMessage {
    Trade(TradeRecord),
    Session(SessionRecord),
    Shutdown,
}

/// Cloneable handle for sending records to the writer (never blocks).
#[derive(Clone)]
pub struct TradeLogChannel {
    tx: Sender<StorageMessage>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for TradeLogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeLogChannel").finish_non_exhaustive()
    }
}

impl TradeLogChannel {
    pub fn record_trade(&self, trade: TradeRecord) {
        let _ = self.tx.send(StorageMessage::Trade(trade));
    }

    pub fn record_session(&self, session: SessionRecord) {
        let _ = self.tx.send(StorageMessage::Session(session));
    }

    /// Flush pending records and wait for the writer thread to exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(StorageMessage::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("[STORAGE] Writer thread panicked");
            }
        }
    }
}

/// Create a trade log channel and spawn the writer thread.
pub fn create_trade_log_channel(db_path: &str) -> TradeLogChannel {
    let (tx, rx) = mpsc::channel();
    let path = db_path.to_string();

    // Dedicated writer thread, isolated from the async runtime
    let handle = thread::spawn(move || {
        storage_writer_loop(rx, &path);
    });

    TradeLogChannel {
        tx,
        handle: Arc::new(Mutex::new(Some(handle))),
    }
}

fn storage_writer_loop(rx: Receiver<StorageMessage>, db_path: &str) {
    let conn = match Connection::open(db_path) {
        Ok(c) => c,
        Err(e) => {
            error!("[STORAGE] Failed to open database at {}: {}", db_path, e);
            return;
        }
    };

    if let Err(e) = create_tables(&conn) {
        error!("[STORAGE] Failed to create tables: {}", e);
        return;
    }

    info!("[STORAGE] Trade log initialized at {}", db_path);

    let mut batch: Vec<StorageMessage> = Vec::with_capacity(BATCH_SIZE);

    loop {
        match rx.recv_timeout(BATCH_TIMEOUT) {
            Ok(StorageMessage::Shutdown) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Writer shutdown complete");
                break;
            }
            Ok(msg) => {
                batch.push(msg);
                if batch.len() >= BATCH_SIZE {
                    flush_batch(&conn, &mut batch);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => flush_batch(&conn, &mut batch),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                flush_batch(&conn, &mut batch);
                info!("[STORAGE] Channel disconnected, writer exiting");
                break;
            }
        }
    }
}

/// Flush a batch of messages in a single transaction.
fn flush_batch(conn: &Connection, batch: &mut Vec<StorageMessage>) {
    if batch.is_empty() {
        return;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!("[STORAGE] Failed to start transaction: {}", e);
            batch.clear();
            return;
        }
    };

    let mut trade_count = 0;
    let mut session_count = 0;

    for msg in batch.drain(..) {
        match msg {
            StorageMessage::Trade(t) => {
                if insert_trade(&tx, &t) {
                    trade_count += 1;
                }
            }
            StorageMessage::Session(s) => {
                if insert_session(&tx, &s) {
                    session_count += 1;
                }
            }
            StorageMessage::Shutdown => {}
        }
    }

    if let Err(e) = tx.commit() {
        error!("[STORAGE] Failed to commit transaction: {}", e);
    } else if trade_count > 0 || session_count > 0 {
        info!(
            "[STORAGE] Flushed {} trades, {} unsettled sessions",
            trade_count, session_count
        );
    }
}

/// Insert a trade and its itemised cards, returns true if successful.
fn insert_trade(conn: &Connection, trade: &TradeRecord) -> bool {
    let result = conn.execute(
        "INSERT INTO trades (timestamp, partner, my_gold, their_gold, my_value, their_value, net_gold)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            trade.timestamp_secs,
            trade.partner,
            trade.my_gold,
            trade.their_gold,
            trade.my_value,
            trade.their_value,
            trade.net_gold(),
        ],
    );
    if let Err(e) = result {
        warn!("[STORAGE] Failed to insert trade with {}: {}", trade.partner, e);
        return false;
    }

    let trade_id = conn.last_insert_rowid();
    let items = trade
        .received
        .iter()
        .map(|(item, n)| ("in", item, n))
        .chain(trade.given.iter().map(|(item, n)| ("out", item, n)));
    for (direction, item, quantity) in items {
        if let Err(e) = conn.execute(
            "INSERT INTO trade_items (trade_id, direction, item, quantity) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![trade_id, direction, item, quantity],
        ) {
            warn!("[STORAGE] Failed to insert trade item {}: {}", item, e);
        }
    }
    true
}

fn insert_session(conn: &Connection, session: &SessionRecord) -> bool {
    let result = conn.execute(
        "INSERT INTO sessions (timestamp, partner, outcome, detail) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            session.timestamp_secs,
            session.partner,
            session.outcome,
            session.detail,
        ],
    );

    match result {
        Ok(_) => true,
        Err(e) => {
            warn!("[STORAGE] Failed to insert session record: {}", e);
            false
        }
    }
}
