//! `SQLite`-backed node store.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use log::debug;
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use wayfold_core::{Coordinate, EntityId, IngestConfig};
use wayfold_fs::{ScratchPath, ScratchSpace};

use super::{BackendKind, NodeStore, NodeStoreError, NodeStoreStats};
use crate::sqlite::{SQLITE_MAX_VARIABLE_NUMBER, configure_scratch_connection, placeholders};

/// Rows inserted before the open transaction is committed.
const ROWS_PER_TRANSACTION: u64 = 100_000;

/// Node store keeping one row per node in an embedded database.
///
/// Inserts are batched in explicit transactions. An in-memory database is
/// copied into a scratch file with `VACUUM INTO` when a flush finds it has
/// outgrown its allowance.
#[derive(Debug)]
pub struct SqliteNodeStore {
    connection: Connection,
    path: Option<ScratchPath>,
    scratch: ScratchSpace,
    max_in_memory_bytes: u64,
    uncommitted: u64,
    nodes: u64,
}

impl SqliteNodeStore {
    /// Open a fresh store, in memory when `in_memory` is set.
    ///
    /// # Errors
    /// Returns [`NodeStoreError`] when the database cannot be created or
    /// initialised.
    pub fn new(
        config: &IngestConfig,
        scratch: ScratchSpace,
        in_memory: bool,
    ) -> Result<Self, NodeStoreError> {
        let (connection, path) = if in_memory {
            let connection =
                Connection::open_in_memory().map_err(NodeStoreError::sqlite("open"))?;
            (connection, None)
        } else {
            let path = scratch
                .reserve_path("nodes-", ".sqlite")
                .map_err(NodeStoreError::io("create node database"))?;
            let connection = Connection::open(path.path().as_std_path())
                .map_err(NodeStoreError::sqlite("open"))?;
            (connection, Some(path))
        };
        configure_scratch_connection(&connection)
            .map_err(NodeStoreError::sqlite("configure"))?;
        connection
            .execute(
                "CREATE TABLE nodes (
                    id INTEGER PRIMARY KEY,
                    lon INTEGER NOT NULL,
                    lat INTEGER NOT NULL
                )",
                [],
            )
            .map_err(NodeStoreError::sqlite("create schema"))?;
        Ok(Self {
            connection,
            path,
            scratch,
            max_in_memory_bytes: config.max_in_memory_bytes,
            uncommitted: 0,
            nodes: 0,
        })
    }

    fn commit(&mut self) -> Result<(), NodeStoreError> {
        if self.connection.is_autocommit() {
            return Ok(());
        }
        self.connection
            .execute_batch("COMMIT")
            .map_err(NodeStoreError::sqlite("commit"))?;
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

    fn lookup_chunk(
        &self,
        chunk: &[EntityId],
        found: &mut HashMap<EntityId, Coordinate>,
    ) -> Result<(), NodeStoreError> {
        let query = format!(
            "SELECT id, lon, lat FROM nodes WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut statement = self
            .connection
            .prepare_cached(&query)
            .map_err(NodeStoreError::sqlite("prepare lookup"))?;
        let mut rows = statement
            .query(params_from_iter(chunk.iter()))
            .map_err(NodeStoreError::sqlite("lookup"))?;
        while let Some(row) = rows.next().map_err(NodeStoreError::sqlite("lookup"))? {
            let read = || -> rusqlite::Result<(EntityId, Coordinate)> {
                Ok((row.get(0)?, Coordinate::from_fixed(row.get(1)?, row.get(2)?)))
            };
            let (id, coord) = read().map_err(NodeStoreError::sqlite("read row"))?;
            found.insert(id, coord);
        }
        Ok(())
    }
}

impl NodeStore for SqliteNodeStore {
    fn put(&mut self, id: EntityId, coord: Coordinate) -> Result<(), NodeStoreError> {
        if self.connection.is_autocommit() {
            self.connection
                .execute_batch("BEGIN")
                .map_err(NodeStoreError::sqlite("begin"))?;
        }
        self.connection
            .prepare_cached("INSERT OR REPLACE INTO nodes (id, lon, lat) VALUES (?1, ?2, ?3)")
            .and_then(|mut statement| statement.execute((id, coord.lon, coord.lat)))
            .map_err(NodeStoreError::sqlite("insert"))?;
        self.nodes += 1;
        self.uncommitted += 1;
        if self.uncommitted >= ROWS_PER_TRANSACTION {
            self.commit()?;
        }
        Ok(())
    }

    fn get(&mut self, id: EntityId) -> Result<Option<Coordinate>, NodeStoreError> {
        self.connection
            .prepare_cached("SELECT lon, lat FROM nodes WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([id], |row| {
                        Ok(Coordinate::from_fixed(row.get(0)?, row.get(1)?))
                    })
                    .optional()
            })
            .map_err(NodeStoreError::sqlite("lookup"))
    }

    fn get_many(
        &mut self,
        ids: &[EntityId],
        out: &mut Vec<Option<Coordinate>>,
    ) -> Result<(), NodeStoreError> {
        let mut found = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(SQLITE_MAX_VARIABLE_NUMBER) {
            self.lookup_chunk(chunk, &mut found)?;
        }
        out.clear();
        out.extend(ids.iter().map(|id| found.get(id).copied()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), NodeStoreError> {
        self.commit()?;
        if self.path.is_none() && self.database_bytes() > self.max_in_memory_bytes {
            debug!("node database exceeded its in-memory allowance");
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), NodeStoreError> {
        self.commit()?;
        if self.path.is_some() {
            return Ok(());
        }
        let target = self
            .scratch
            .reserve_path("nodes-", ".sqlite")
            .map_err(NodeStoreError::io("create node database"))?;
        self.connection
            .execute("VACUUM INTO ?1", [target.path().as_str()])
            .map_err(NodeStoreError::sqlite("vacuum into"))?;
        let connection = Connection::open(target.path().as_std_path())
            .map_err(NodeStoreError::sqlite("reopen"))?;
        configure_scratch_connection(&connection)
            .map_err(NodeStoreError::sqlite("configure"))?;
        debug!("spilled node database to {}", target.path());
        self.connection = connection;
        self.path = Some(target);
        Ok(())
    }

    fn close(mut self: Box<Self>, retain: bool) -> Result<Option<Utf8PathBuf>, NodeStoreError> {
        self.commit()?;
        let Self {
            connection, path, ..
        } = *self;
        connection
            .close()
            .map_err(|(_, source)| NodeStoreError::Sqlite {
                operation: "close",
                source,
            })?;
        match path {
            Some(path) if retain => path
                .retain()
                .map(Some)
                .map_err(NodeStoreError::io("retain node database")),
            Some(path) => path
                .discard()
                .map(|()| None)
                .map_err(NodeStoreError::io("remove node database")),
            None => Ok(None),
        }
    }

    fn stats(&self) -> NodeStoreStats {
        NodeStoreStats {
            nodes: self.nodes,
            resident_bytes: if self.path.is_some() {
                0
            } else {
                self.database_bytes()
            },
            on_disk: self.path.is_some(),
            raw_buckets: 0,
            compressed_buckets: 0,
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }
}
