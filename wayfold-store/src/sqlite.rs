//! Shared `SQLite` helpers for the relational backend.

use rusqlite::Connection;

/// `SQLite` limits bound parameters per statement to 999 by default. Lookups
/// chunk `IN` queries to remain below that ceiling.
pub(crate) const SQLITE_MAX_VARIABLE_NUMBER: usize = 999;

/// Tune a connection for a throwaway working set: no journal, no fsync.
pub(crate) fn configure_scratch_connection(connection: &Connection) -> rusqlite::Result<()> {
    connection.pragma_update(None, "journal_mode", "OFF")?;
    connection.pragma_update(None, "synchronous", "OFF")?;
    connection.pragma_update(None, "temp_store", "MEMORY")?;
    connection.set_prepared_statement_cache_capacity(64);
    Ok(())
}

/// `?, ?, ...` with `count` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
