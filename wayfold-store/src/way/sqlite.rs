//! `SQLite`-backed way store.

use camino::Utf8PathBuf;
use log::debug;
use rusqlite::{Connection, OptionalExtension};
use wayfold_core::{EntityId, IngestConfig};
use wayfold_fs::{ScratchPath, ScratchSpace};

use super::{ResolvedWay, WayStore, WayStoreError, codec};
use crate::sqlite::configure_scratch_connection;

const ROWS_PER_TRANSACTION: u64 = 10_000;

/// Way store keeping one encoded blob per way in an embedded database.
#[derive(Debug)]
pub struct SqliteWayStore {
    connection: Connection,
    path: Option<ScratchPath>,
    scratch_space: ScratchSpace,
    max_in_memory_bytes: u64,
    uncommitted: u64,
    len: usize,
    scratch: Vec<u8>,
}

impl SqliteWayStore {
    /// Open a fresh store, in memory when `in_memory` is set.
    ///
    /// # Errors
    /// Returns [`WayStoreError`] when the database cannot be created or
    /// initialised.
    pub fn new(
        config: &IngestConfig,
        scratch_space: ScratchSpace,
        in_memory: bool,
    ) -> Result<Self, WayStoreError> {
        let (connection, path) = if in_memory {
            let connection =
                Connection::open_in_memory().map_err(WayStoreError::sqlite("open"))?;
            (connection, None)
        } else {
            let path = scratch_space
                .reserve_path("ways-", ".sqlite")
                .map_err(WayStoreError::io("create way database"))?;
            let connection = Connection::open(path.path().as_std_path())
                .map_err(WayStoreError::sqlite("open"))?;
            (connection, Some(path))
        };
        configure_scratch_connection(&connection).map_err(WayStoreError::sqlite("configure"))?;
        connection
            .execute(
                "CREATE TABLE ways (id INTEGER PRIMARY KEY, data BLOB NOT NULL)",
                [],
            )
            .map_err(WayStoreError::sqlite("create schema"))?;
        Ok(Self {
            connection,
            path,
            scratch_space,
            max_in_memory_bytes: config.max_in_memory_bytes,
            uncommitted: 0,
            len: 0,
            scratch: Vec::new(),
        })
    }

    fn commit(&mut self) -> Result<(), WayStoreError> {
        if self.connection.is_autocommit() {
            return Ok(());
        }
        self.connection
            .execute_batch("COMMIT")
            .map_err(WayStoreError::sqlite("commit"))?;
        self.uncommitted = 0;
        Ok(())
    }

    fn database_bytes(&self) -> u64 {
        let pages: i64 = self
            .connection
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or_default();
        let page_size: i64 = self
            .connection
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or_default();
        u64::try_from(pages.saturating_mul(page_size)).unwrap_or_default()
    }
}

impl WayStore for SqliteWayStore {
    fn put(&mut self, way: &ResolvedWay) -> Result<(), WayStoreError> {
        if self.connection.is_autocommit() {
            self.connection
                .execute_batch("BEGIN")
                .map_err(WayStoreError::sqlite("begin"))?;
        }
        let exists = self
            .connection
            .prepare_cached("SELECT 1 FROM ways WHERE id = ?1")
            .and_then(|mut statement| statement.exists([way.id]))
            .map_err(WayStoreError::sqlite("lookup"))?;
        self.scratch.clear();
        codec::encode_resolved_way(way, &mut self.scratch)
            .map_err(|source| WayStoreError::Encode { id: way.id, source })?;
        self.connection
            .prepare_cached("INSERT OR REPLACE INTO ways (id, data) VALUES (?1, ?2)")
            .and_then(|mut statement| statement.execute((way.id, &self.scratch)))
            .map_err(WayStoreError::sqlite("insert"))?;
        if !exists {
            self.len += 1;
        }
        self.uncommitted += 1;
        if self.uncommitted >= ROWS_PER_TRANSACTION {
            self.commit()?;
        }
        Ok(())
    }

    fn get(&mut self, id: EntityId) -> Result<Option<ResolvedWay>, WayStoreError> {
        let data: Option<Vec<u8>> = self
            .connection
            .prepare_cached("SELECT data FROM ways WHERE id = ?1")
            .and_then(|mut statement| statement.query_row([id], |row| row.get(0)).optional())
            .map_err(WayStoreError::sqlite("lookup"))?;
        data.map(|bytes| {
            codec::decode_resolved_way(&bytes).map_err(|source| WayStoreError::Corrupt { id, source })
        })
        .transpose()
    }

    fn flush(&mut self) -> Result<(), WayStoreError> {
        self.commit()?;
        if self.path.is_none() && self.database_bytes() > self.max_in_memory_bytes {
            debug!("way database exceeded its in-memory allowance");
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), WayStoreError> {
        self.commit()?;
        if self.path.is_some() {
            return Ok(());
        }
        let target = self
            .scratch_space
            .reserve_path("ways-", ".sqlite")
            .map_err(WayStoreError::io("create way database"))?;
        self.connection
            .execute("VACUUM INTO ?1", [target.path().as_str()])
            .map_err(WayStoreError::sqlite("vacuum into"))?;
        let connection = Connection::open(target.path().as_std_path())
            .map_err(WayStoreError::sqlite("reopen"))?;
        configure_scratch_connection(&connection).map_err(WayStoreError::sqlite("configure"))?;
        debug!("spilled way database to {}", target.path());
        self.connection = connection;
        self.path = Some(target);
        Ok(())
    }

    fn close(mut self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, WayStoreError> {
        self.commit()?;
        let Self {
            connection, path, ..
        } = *self;
        connection
            .close()
            .map_err(|(_, source)| WayStoreError::Sqlite {
                operation: "close",
                source,
            })?;
        match path {
            Some(path) if retain => path
                .retain()
                .map(Some)
                .map_err(WayStoreError::io("retain way database")),
            Some(path) => path
                .discard()
                .map(|()| None)
                .map_err(WayStoreError::io("remove way database")),
            None => Ok(None),
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn resident_bytes(&self) -> u64 {
        if self.path.is_some() {
            0
        } else {
            self.database_bytes()
        }
    }
}
