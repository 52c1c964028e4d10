//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: entity records and the mutation log
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS records (
            table_name TEXT NOT NULL,
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version >= 1),
            natural_key TEXT,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            PRIMARY KEY (table_name, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_user_updated
            ON records(table_name, user_id, updated_at DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_records_natural_key
            ON records(table_name, user_id, natural_key)
            WHERE natural_key IS NOT NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS pending_mutations (
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            payload TEXT NOT NULL,
            queued_at INTEGER NOT NULL,
            PRIMARY KEY (table_name, record_id)
        );
        CREATE INDEX IF NOT EXISTS idx_pending_user
            ON pending_mutations(user_id, table_name, queued_at);",
    )?;
    tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: per (table, user) sync bookkeeping
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_bookkeeping (
            table_name TEXT NOT NULL,
            user_id TEXT NOT NULL,
            last_sync_at INTEGER,
            last_push_at INTEGER,
            last_pull_at INTEGER,
            sync_status TEXT NOT NULL DEFAULT 'idle'
                CHECK (sync_status IN ('idle', 'syncing', 'success', 'error', 'conflict')),
            conflict_count INTEGER NOT NULL DEFAULT 0 CHECK (conflict_count >= 0),
            error_message TEXT,
            last_error_at INTEGER,
            record_count INTEGER,
            sync_token TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            cycle_started_at INTEGER,
            PRIMARY KEY (table_name, user_id)
        );",
    )?;
    tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
