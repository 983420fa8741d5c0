//! Configuration for views and the SQLite-backed reference store.

use crate::models::{CREATED_PROPERTY, LIBRARY_TABLE, ORDINAL_PROPERTY, SIMPLE_LIST_TABLE};

/// Default number of array indices fetched per page.
pub const DEFAULT_FETCH_SIZE: u32 = 100;

/// Default capacity of the property bag LRU.
pub const DEFAULT_PROPERTY_CACHE_ENTRIES: usize = 2048;

/// Settings for a tree view instance.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Text shown in the synthetic "all" row.
    pub all_label: String,
    /// Property id of the ordinal column. Rendered as `index + 1`.
    pub ordinal_property: String,
    /// Sort key substituted for ordinal sorts on the library, which has no ordinal.
    pub created_property: String,
    /// Base table name that identifies a library array.
    pub library_table: String,
    /// Base table name that identifies a simple media list array.
    pub simple_list_table: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            all_label: "All".to_string(),
            ordinal_property: ORDINAL_PROPERTY.to_string(),
            created_property: CREATED_PROPERTY.to_string(),
            library_table: LIBRARY_TABLE.to_string(),
            simple_list_table: SIMPLE_LIST_TABLE.to_string(),
        }
    }
}

impl ViewConfig {
    pub fn with_all_label(mut self, label: impl Into<String>) -> Self {
        self.all_label = label.into();
        self
    }
}

/// Settings for [`crate::models::SqliteGuidArray`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Paging granularity handed to views.
    pub fetch_size: u32,
    /// Number of property bags kept in memory.
    pub property_cache_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            property_cache_entries: DEFAULT_PROPERTY_CACHE_ENTRIES,
        }
    }
}
