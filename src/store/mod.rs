// =============================================================================
// Store — single writer, pooled readers, WAL-mode SQLite
// =============================================================================
//
// One process-wide writer `Connection` behind a mutex serializes every
// mutating statement and its commit. A small round-robin pool of read-only
// connections serves queries without ever touching the write lock. Both
// sides share the same WAL file so readers observe committed writes without
// blocking the writer.
//
// =============================================================================

pub mod models;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::info;

use crate::error::CoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    address     TEXT PRIMARY KEY,
    first_seen  REAL NOT NULL,
    last_seen   REAL NOT NULL,
    trade_count INTEGER NOT NULL DEFAULT 0,
    last_polled REAL,
    tier        INTEGER NOT NULL DEFAULT 3,
    total_size_usd REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_addresses_tier_polled ON addresses(tier, last_polled);
CREATE INDEX IF NOT EXISTS idx_addresses_last_seen ON addresses(last_seen);

CREATE TABLE IF NOT EXISTS positions (
    address     TEXT NOT NULL,
    coin        TEXT NOT NULL,
    side        TEXT NOT NULL,
    size        REAL NOT NULL,
    size_usd    REAL NOT NULL,
    entry_px    REAL NOT NULL,
    mark_px     REAL NOT NULL,
    leverage    REAL NOT NULL DEFAULT 1,
    margin_used REAL NOT NULL DEFAULT 0,
    liq_px      REAL,
    unrealized_pnl REAL NOT NULL DEFAULT 0,
    updated_at  REAL NOT NULL,
    PRIMARY KEY (address, coin)
);
CREATE INDEX IF NOT EXISTS idx_positions_coin ON positions(coin);
CREATE INDEX IF NOT EXISTS idx_positions_size_usd ON positions(size_usd);

CREATE TABLE IF NOT EXISTS hlp_snapshots (
    vault_address TEXT NOT NULL,
    coin          TEXT NOT NULL,
    snapshot_at   REAL NOT NULL,
    side          TEXT NOT NULL,
    size          REAL NOT NULL,
    size_usd      REAL NOT NULL,
    entry_px      REAL NOT NULL,
    mark_px       REAL NOT NULL,
    leverage      REAL NOT NULL DEFAULT 1,
    unrealized_pnl REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (vault_address, coin, snapshot_at)
);
CREATE INDEX IF NOT EXISTS idx_hlp_snapshot_at ON hlp_snapshots(snapshot_at);

CREATE TABLE IF NOT EXISTS pnl_snapshots (
    address     TEXT NOT NULL,
    snapshot_at REAL NOT NULL,
    equity      REAL NOT NULL,
    unrealized  REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (address, snapshot_at)
);
CREATE INDEX IF NOT EXISTS idx_pnl_snapshot_at ON pnl_snapshots(snapshot_at);
CREATE INDEX IF NOT EXISTS idx_pnl_addr_snap ON pnl_snapshots(address, snapshot_at, equity);

CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS liquidation_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    coin       TEXT NOT NULL,
    occurred_at REAL NOT NULL,
    side       TEXT NOT NULL,
    size_usd   REAL NOT NULL,
    price      REAL NOT NULL,
    address    TEXT
);
CREATE INDEX IF NOT EXISTS idx_liq_events_coin ON liquidation_events(coin);
CREATE INDEX IF NOT EXISTS idx_liq_events_occurred ON liquidation_events(occurred_at);

CREATE TABLE IF NOT EXISTS watched_wallets (
    address    TEXT PRIMARY KEY,
    label      TEXT DEFAULT '',
    added_at   REAL NOT NULL,
    is_active  INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS wallet_profiles (
    address        TEXT PRIMARY KEY,
    computed_at    REAL NOT NULL,
    win_rate       REAL,
    trade_count    INTEGER,
    profit_factor  REAL,
    avg_hold_hours REAL,
    avg_pnl_pct    REAL,
    max_drawdown   REAL,
    style          TEXT,
    is_bot         INTEGER DEFAULT 0,
    equity         REAL
);

CREATE TABLE IF NOT EXISTS position_changes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    address    TEXT NOT NULL,
    coin       TEXT NOT NULL,
    action     TEXT NOT NULL,
    side       TEXT,
    size_usd   REAL,
    price      REAL,
    detected_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pc_address ON position_changes(address);
CREATE INDEX IF NOT EXISTS idx_pc_detected ON position_changes(detected_at);
"#;

const READ_POOL_SIZE: usize = 4;

pub struct Store {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    path: String,
}

impl Store {
    /// Open the writer connection, apply PRAGMAs, and spin up the read pool.
    /// Does not create tables — call `init_schema` separately.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let path_str = path.display().to_string();

        let writer = Self::open_conn(path)?;

        let mut readers = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            readers.push(Mutex::new(Self::open_conn(path)?));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            path: path_str,
        })
    }

    fn open_conn(path: &Path) -> Result<Connection, CoreError> {
        let conn = Connection::open(path).map_err(|source| CoreError::StoreOpen {
            path: path.display().to_string(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| CoreError::StoreOpen {
                path: path.display().to_string(),
                source,
            })?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))
            .map_err(|source| CoreError::StoreOpen {
                path: path.display().to_string(),
                source,
            })?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|source| CoreError::StoreOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(conn)
    }

    /// Take the write lock. Every INSERT/UPDATE/DELETE + commit must happen
    /// while holding this guard.
    pub fn write_lock(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock()
    }

    /// Borrow one read-only connection from the pool, round-robin.
    pub fn read_conn(&self) -> MutexGuard<'_, Connection> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx].lock()
    }

    /// Create tables/indexes and run idempotent migrations.
    pub fn init_schema(&self) -> Result<(), CoreError> {
        let conn = self.writer.lock();
        conn.execute_batch(SCHEMA).map_err(CoreError::SchemaInit)?;
        self.run_migrations(&conn)?;
        info!(path = %self.path, "database schema initialized");
        Ok(())
    }

    fn run_migrations(&self, conn: &Connection) -> Result<(), CoreError> {
        for (col, default) in [("notes", "''"), ("tags", "''")] {
            let sql = format!("ALTER TABLE watched_wallets ADD COLUMN {col} TEXT DEFAULT {default}");
            let _ = conn.execute(&sql, []); // ignore "duplicate column" — idempotent

        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_alerts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                address    TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                min_size_usd REAL DEFAULT 0,
                coins      TEXT DEFAULT '',
                enabled    INTEGER NOT NULL DEFAULT 1,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_wallet_alerts_address ON wallet_alerts(address);
            CREATE INDEX IF NOT EXISTS idx_wallet_alerts_enabled ON wallet_alerts(enabled);
            "#,
        )
        .map_err(CoreError::SchemaInit)?;

        Ok(())
    }

    /// Delete time-series rows older than `days`. Returns the number of
    /// rows removed across all pruned tables.
    pub fn prune_old_data(&self, days: u32) -> rusqlite::Result<usize> {
        let cutoff = crate::util::unix_time() - (days as f64) * 86400.0;
        let conn = self.writer.lock();
        let n1 = conn.execute("DELETE FROM hlp_snapshots WHERE snapshot_at < ?1", [cutoff])?;
        let n2 = conn.execute("DELETE FROM pnl_snapshots WHERE snapshot_at < ?1", [cutoff])?;
        let n3 = conn.execute(
            "DELETE FROM liquidation_events WHERE occurred_at < ?1",
            [cutoff],
        )?;
        let deleted = n1 + n2 + n3;
        if deleted > 0 {
            info!(deleted, days, "pruned old time-series rows");
        }
        Ok(deleted)
    }

    /// Prune stale positions (not updated in 24h) and old position-change
    /// events (older than 7 days). Returns `(positions_pruned, changes_pruned)`.
    pub fn prune_stale_tracking(&self) -> rusqlite::Result<(usize, usize)> {
        let now = crate::util::unix_time();
        let conn = self.writer.lock();
        let positions = conn.execute(
            "DELETE FROM positions WHERE updated_at < ?1",
            [now - 86400.0],
        )?;
        let changes = conn.execute(
            "DELETE FROM position_changes WHERE detected_at < ?1",
            [now - 7.0 * 86400.0],
        )?;
        Ok((positions, changes))
    }

    pub fn close(&self) {
        // rusqlite connections close on drop; nothing else to release here.
        info!(path = %self.path, "database closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_store_test::temp_db_path;

    // A tiny local helper module avoids pulling in the `tempfile` crate just
    // for these tests: we reuse the OS temp dir with a unique suffix.
    mod tempfile_store_test {
        use crate::util::unix_time_ms;
        pub fn temp_db_path(label: &str) -> std::path::PathBuf {
            std::env::temp_dir().join(format!("hynous-data-test-{label}-{}.db", unix_time_ms()))
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let path = temp_db_path("schema");
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        store.init_schema().unwrap(); // second call must not fail
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn write_lock_serializes_and_read_pool_rotates() {
        let path = temp_db_path("rw");
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        {
            let conn = store.write_lock();
            conn.execute(
                "INSERT INTO addresses (address, first_seen, last_seen) VALUES (?1, ?2, ?2)",
                rusqlite::params!["0xabc", 1.0_f64],
            )
            .unwrap();
        }
        let first = store.read_conn();
        let count: i64 = first
            .query_row("SELECT COUNT(*) FROM addresses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        drop(first);
        // round-robin should hand back a (possibly different) pooled reader
        let _second = store.read_conn();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn prune_old_data_removes_only_stale_rows() {
        let path = temp_db_path("prune");
        let store = Store::open(&path).unwrap();
        store.init_schema().unwrap();
        {
            let conn = store.write_lock();
            conn.execute(
                "INSERT INTO hlp_snapshots (vault_address, coin, snapshot_at, side, size, size_usd, entry_px, mark_px) VALUES ('v','BTC',?1,'long',1,100,1,1)",
                [1.0_f64],
            ).unwrap();
            conn.execute(
                "INSERT INTO hlp_snapshots (vault_address, coin, snapshot_at, side, size, size_usd, entry_px, mark_px) VALUES ('v','BTC',?1,'long',1,100,1,1)",
                [crate::util::unix_time()],
            ).unwrap();
        }
        let deleted = store.prune_old_data(7).unwrap();
        assert_eq!(deleted, 1);
        let _ = std::fs::remove_file(&path);
    }
}
