//! Database schema creation.

use rusqlite::{Connection, Result};

/// Create all trade log tables and indexes.
pub fn create_tables(conn: &Connection) -> Result<()> {
    // Trades: one row per settlement
    conn.execute(
        "CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            partner TEXT NOT NULL,
            my_gold INTEGER NOT NULL,
            their_gold INTEGER NOT NULL,
            my_value INTEGER NOT NULL,
            their_value INTEGER NOT NULL,
            net_gold INTEGER NOT NULL
        )",
        [],
    )?;

    // Itemised cards per trade; direction is 'in' (received) or 'out' (given)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS trade_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_id INTEGER NOT NULL,
            direction TEXT NOT NULL,
            item TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            FOREIGN KEY (trade_id) REFERENCES trades(id)
        )",
        [],
    )?;

    // Sessions that ended without a settlement
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            partner TEXT NOT NULL,
            outcome TEXT NOT NULL,
            detail TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(timestamp DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trades_partner ON trades(partner)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trade_items_item ON trade_items(item)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('trades', 'trade_items', 'sessions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }
}
