//! SQLite-backed media library used as the reference backing store.
//!
//! This module provides the `MediaStore` struct which manages all database
//! operations behind a [`crate::models::SqliteGuidArray`], including:
//! - Library items and their property values
//! - Simple media lists (ordered, duplicates allowed)
//! - Persisted view states (sort descriptor plus selection)

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::models::{
    Guid, PropertyBag, SelectionEntries, SelectionState, SortDescriptor, ViewState,
};

/// Table holding every library item.
pub const LIBRARY_TABLE: &str = "media_items";

/// Table holding the entries of simple media lists.
pub const SIMPLE_LIST_TABLE: &str = "simple_media_lists";

/// Property id under which an item's creation time is exposed.
pub const CREATED_PROPERTY: &str = "created";

/// SQLite-backed storage for library items, lists and view states.
///
/// The connection sits behind a mutex so shared `&self` handles can run
/// transactions.
pub struct MediaStore {
    conn: Mutex<Connection>,
}

impl MediaStore {
    /// Opens or creates the database at the default XDG location.
    pub fn open_default() -> Result<Self> {
        let db_path = Self::default_db_path()?;
        Self::open(&db_path)
    }

    /// Returns the default database path based on XDG directories.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "mlview")
            .context("Failed to determine project directories")?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(data_dir.join("library.sqlite"))
    }

    /// Opens or creates the database at the specified path.
    ///
    /// Configures SQLite with WAL journaling and foreign keys enabled.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA cache_size = -64000;
            PRAGMA foreign_keys = ON;
            ",
        )
        .context("Failed to configure SQLite pragmas")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;

        info!("Opened media store at {:?}", path);
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to configure SQLite pragmas")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;

        debug!("Opened in-memory media store");
        Ok(store)
    }

    /// Creates the database schema if it doesn't exist.
    fn create_tables(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS media_items (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                guid TEXT NOT NULL UNIQUE,
                created INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS media_item_properties (
                guid TEXT NOT NULL,
                property_id TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (guid, property_id),
                FOREIGN KEY (guid) REFERENCES media_items(guid) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_item_properties_property
                ON media_item_properties(property_id, value);

            -- Entries of simple lists; the same item may appear more than once
            CREATE TABLE IF NOT EXISTS simple_media_lists (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                list_guid TEXT NOT NULL,
                item_guid TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                FOREIGN KEY (item_guid) REFERENCES media_items(guid) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_simple_media_lists_list
                ON simple_media_lists(list_guid, ordinal);

            CREATE TABLE IF NOT EXISTS view_state (
                key TEXT PRIMARY KEY NOT NULL,
                sort_property TEXT NOT NULL,
                ascending INTEGER NOT NULL,
                selection_all INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS view_state_selection (
                key TEXT NOT NULL,
                identifier TEXT NOT NULL,
                guid TEXT NOT NULL,
                PRIMARY KEY (key, identifier),
                FOREIGN KEY (key) REFERENCES view_state(key) ON DELETE CASCADE
            );
            ",
            )
            .context("Failed to create database tables")?;

        debug!("Database tables created/verified");
        Ok(())
    }

    /// Runs `f` with the locked connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // =========================================================================
    // Library Items
    // =========================================================================

    /// Adds an item and its properties in one transaction. Returns the rowid.
    pub fn add_item(&self, item: &PropertyBag, created: i64) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO media_items (guid, created) VALUES (?1, ?2)",
            params![item.guid(), created],
        )
        .with_context(|| format!("Failed to insert item {}", item.guid()))?;
        let rowid = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO media_item_properties (guid, property_id, value)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (property, value) in item.iter() {
                stmt.execute(params![item.guid(), property, value])?;
            }
        }

        tx.commit()?;
        Ok(rowid)
    }

    /// Adds many items, stamping them with the current time.
    pub fn add_items(&self, items: &[PropertyBag]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let created = Self::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut insert_item =
                tx.prepare_cached("INSERT INTO media_items (guid, created) VALUES (?1, ?2)")?;
            let mut insert_property = tx.prepare_cached(
                "INSERT OR REPLACE INTO media_item_properties (guid, property_id, value)
                 VALUES (?1, ?2, ?3)",
            )?;
            for item in items {
                insert_item.execute(params![item.guid(), created])?;
                for (property, value) in item.iter() {
                    insert_property.execute(params![item.guid(), property, value])?;
                }
            }
        }
        tx.commit()?;

        debug!(count = items.len(), "Batch inserted library items");
        Ok(items.len())
    }

    /// Deletes an item, its properties and every list entry pointing at it.
    pub fn remove_item(&self, guid: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM media_items WHERE guid = ?1", params![guid])
            .context("Failed to delete item")?;
        Ok(removed > 0)
    }

    pub fn set_item_property(&self, guid: &str, property: &str, value: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO media_item_properties (guid, property_id, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(guid, property_id) DO UPDATE SET value = excluded.value",
                params![guid, property, value],
            )
            .with_context(|| format!("Failed to set {property} on {guid}"))?;
        Ok(())
    }

    pub fn item_property(&self, guid: &str, property: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        if property == CREATED_PROPERTY {
            return conn
                .query_row(
                    "SELECT created FROM media_items WHERE guid = ?1",
                    params![guid],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map(|created| created.map(|c| c.to_string()))
                .context("Failed to query created time");
        }

        conn.query_row(
            "SELECT value FROM media_item_properties WHERE guid = ?1 AND property_id = ?2",
            params![guid, property],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query item property")
    }

    /// Loads property bags for `guids`, in order. Unknown guids yield `None`.
    pub fn item_properties(&self, guids: &[Guid]) -> Result<Vec<Option<PropertyBag>>> {
        let conn = self.conn.lock();
        let mut item_stmt = conn.prepare_cached("SELECT created FROM media_items WHERE guid = ?1")?;
        let mut props_stmt = conn.prepare_cached(
            "SELECT property_id, value FROM media_item_properties WHERE guid = ?1",
        )?;

        let mut bags = Vec::with_capacity(guids.len());
        for guid in guids {
            let created: Option<i64> = item_stmt
                .query_row(params![guid], |row| row.get(0))
                .optional()?;
            let Some(created) = created else {
                bags.push(None);
                continue;
            };

            let mut bag = PropertyBag::new(guid.clone());
            bag.insert(CREATED_PROPERTY, created.to_string());
            let rows = props_stmt.query_map(params![guid], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (property, value) = row?;
                bag.insert(property, value);
            }
            bags.push(Some(bag));
        }

        Ok(bags)
    }

    pub fn count_items(&self) -> Result<u32> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM media_items", [], |r| r.get(0))?;
        Ok(count as u32)
    }

    // =========================================================================
    // Simple Lists
    // =========================================================================

    /// Appends `item_guid` to the list. Returns the entry's rowid.
    pub fn add_list_entry(&self, list_guid: &str, item_guid: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO simple_media_lists (list_guid, item_guid, ordinal)
             SELECT ?1, ?2, COALESCE(MAX(ordinal), -1) + 1
             FROM simple_media_lists WHERE list_guid = ?1",
            params![list_guid, item_guid],
        )
        .with_context(|| format!("Failed to append {item_guid} to list {list_guid}"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_list_entries(&self, list_guid: &str) -> Result<u32> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM simple_media_lists WHERE list_guid = ?1",
            params![list_guid],
            |r| r.get(0),
        )?;
        Ok(count as u32)
    }

    // =========================================================================
    // View State
    // =========================================================================

    /// Persists `state` under `key`, replacing any previous state.
    pub fn save_view_state(&self, key: &str, state: &ViewState) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM view_state WHERE key = ?1", params![key])?;
        tx.execute(
            "INSERT INTO view_state (key, sort_property, ascending, selection_all, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                state.sort.property,
                state.sort.ascending,
                state.selection.is_all(),
                Self::now(),
            ],
        )
        .context("Failed to save view state")?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO view_state_selection (key, identifier, guid) VALUES (?1, ?2, ?3)",
            )?;
            for (identifier, guid) in state.selection.entries() {
                stmt.execute(params![key, identifier, guid])?;
            }
        }

        tx.commit()?;
        debug!(key, state = %state, "Saved view state");
        Ok(())
    }

    pub fn load_view_state(&self, key: &str) -> Result<Option<ViewState>> {
        let conn = self.conn.lock();
        let header = conn
            .query_row(
                "SELECT sort_property, ascending, selection_all FROM view_state WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load view state")?;

        let Some((property, ascending, all)) = header else {
            return Ok(None);
        };

        let selection = if all {
            SelectionState::AllSelected
        } else {
            let mut stmt = conn.prepare_cached(
                "SELECT identifier, guid FROM view_state_selection WHERE key = ?1",
            )?;
            let rows = stmt.query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut entries = SelectionEntries::new();
            for row in rows {
                let (identifier, guid) = row?;
                entries.insert(identifier, guid);
            }
            SelectionState::Explicit(entries)
        };

        Ok(Some(ViewState::new(
            SortDescriptor::new(property, ascending),
            selection,
        )))
    }

    pub fn delete_view_state(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM view_state WHERE key = ?1", params![key])?;
        if removed == 0 {
            warn!(key, "No view state to delete");
        }
        Ok(removed > 0)
    }

    // =========================================================================
    // Utility Functions
    // =========================================================================

    /// Returns the current Unix timestamp.
    pub fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}
