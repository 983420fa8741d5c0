//! Two-tier row cache keyed by array index.
//!
//! The primary tier is authoritative and dropped wholesale on rebuild. The dirty
//! tier keeps what was on screen before the rebuild so cells don't flash blank
//! while fresh pages load; each fresh `put` evicts its dirty counterpart.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use tracing::trace;

use crate::error::ViewResult;
use crate::models::PropertyBag;

/// Fetch state of one page of `fetch_size` indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageStatus {
    #[default]
    Uncached,
    Pending,
    Cached,
}

#[derive(Debug)]
pub struct PageCache {
    fetch_size: u32,
    rows: HashMap<u32, Arc<PropertyBag>>,
    dirty: HashMap<u32, Arc<PropertyBag>>,
    pages: HashMap<u32, PageStatus>,
}

impl PageCache {
    pub fn new(fetch_size: u32) -> Self {
        Self {
            fetch_size: fetch_size.max(1),
            rows: HashMap::new(),
            dirty: HashMap::new(),
            pages: HashMap::new(),
        }
    }

    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    pub fn page_of(&self, index: u32) -> u32 {
        index / self.fetch_size
    }

    /// Indices of the page holding `index`, clamped to `length`.
    pub fn page_range(&self, index: u32, length: u32) -> Option<RangeInclusive<u32>> {
        let start = self.page_of(index) * self.fetch_size;
        if start >= length {
            return None;
        }
        let end = start.saturating_add(self.fetch_size - 1).min(length - 1);
        Some(start..=end)
    }

    /// Primary entry, else the stale entry kept from before the last rebuild.
    pub fn get(&self, index: u32) -> Option<&Arc<PropertyBag>> {
        self.rows.get(&index).or_else(|| self.dirty.get(&index))
    }

    /// Primary entry only.
    pub fn get_fresh(&self, index: u32) -> Option<&Arc<PropertyBag>> {
        self.rows.get(&index)
    }

    pub fn put(&mut self, index: u32, bag: Arc<PropertyBag>) -> ViewResult<()> {
        self.rows.try_reserve(1)?;
        self.rows.insert(index, bag);
        self.dirty.remove(&index);
        Ok(())
    }

    /// Drops the primary tier and all page states. Entries for `visible`
    /// indices move to the dirty tier first.
    pub fn invalidate(&mut self, visible: Option<RangeInclusive<u32>>) -> ViewResult<()> {
        if let Some(visible) = visible {
            for index in visible {
                if let Some(bag) = self.rows.get(&index) {
                    self.dirty.try_reserve(1)?;
                    self.dirty.insert(index, bag.clone());
                }
            }
        }

        trace!(
            rows = self.rows.len(),
            dirty = self.dirty.len(),
            "Page cache invalidated"
        );
        self.rows.clear();
        self.pages.clear();
        Ok(())
    }

    pub fn page_status(&self, index: u32) -> PageStatus {
        self.pages
            .get(&self.page_of(index))
            .copied()
            .unwrap_or_default()
    }

    /// Sets the status of the page holding `index`. Ignored when `index` is
    /// not below `row_count`, which may have shrunk since the page was asked for.
    pub fn set_page_status(&mut self, index: u32, status: PageStatus, row_count: u32) {
        if index >= row_count {
            return;
        }
        let page = self.page_of(index);
        match status {
            PageStatus::Uncached => {
                self.pages.remove(&page);
            }
            status => {
                self.pages.insert(page, status);
            }
        }
    }

    /// Indices at or after `start` held in the primary tier, ascending.
    pub fn fresh_indices_from(&self, start: u32) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .rows
            .keys()
            .copied()
            .filter(|index| *index >= start)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Number of primary entries.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }
}
