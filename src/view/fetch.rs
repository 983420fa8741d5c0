//! Page fetching: at most one request in flight, at most one waiting.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{MediaTreeView, PageStatus, RowCountState};
use crate::error::{ArrayError, ViewError, ViewResult};
use crate::models::{Guid, PropertyBag};

/// Observable state of a [`FetchCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    OneOutstanding,
    OneOutstandingWithOnDeck,
}

/// What to do with a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// Nothing is in flight: fetch `index` now.
    Issue(u32),
    /// Wait behind the fetch in flight. `superseded` lost the on-deck slot.
    OnDeck { index: u32, superseded: Option<u32> },
}

/// Tracks the single outstanding fetch and the single on-deck successor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCoordinator {
    outstanding: bool,
    on_deck: Option<u32>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FetchState {
        match (self.outstanding, self.on_deck) {
            (false, _) => FetchState::Idle,
            (true, None) => FetchState::OneOutstanding,
            (true, Some(_)) => FetchState::OneOutstandingWithOnDeck,
        }
    }

    pub fn on_deck(&self) -> Option<u32> {
        self.on_deck
    }

    pub fn request(&mut self, index: u32) -> FetchDecision {
        if !self.outstanding {
            self.outstanding = true;
            return FetchDecision::Issue(index);
        }
        FetchDecision::OnDeck {
            index,
            superseded: self.on_deck.replace(index),
        }
    }

    /// The fetch in flight finished. Returns the on-deck index, which the
    /// caller must issue now; it becomes the one in flight.
    pub fn complete(&mut self) -> Option<u32> {
        let next = self.on_deck.take();
        self.outstanding = next.is_some();
        next
    }

    /// The fetch in flight finished but its answer is void. The on-deck
    /// request is dropped too and returned for bookkeeping.
    pub fn abandon(&mut self) -> Option<u32> {
        self.outstanding = false;
        self.on_deck.take()
    }

    /// Issuing the request failed; nothing is in flight.
    pub fn issue_failed(&mut self) {
        self.outstanding = false;
    }
}

impl MediaTreeView {
    /// Cache-miss path: fetch the page holding `index`, or queue it on deck.
    pub(super) fn request_page(&self, index: u32) -> ViewResult<()> {
        if self.row_count_state.get() != RowCountState::Clean {
            return Ok(());
        }

        let row_count = self.index.get().row_count();
        let decision = {
            let mut cache = self.cache.borrow_mut();
            if cache.page_status(index) != PageStatus::Uncached {
                return Ok(());
            }
            let decision = self.fetch.borrow_mut().request(index);
            if let FetchDecision::OnDeck {
                superseded: Some(old),
                ..
            } = decision
            {
                cache.set_page_status(old, PageStatus::Uncached, row_count);
            }
            cache.set_page_status(index, PageStatus::Pending, row_count);
            decision
        };

        match decision {
            FetchDecision::Issue(index) => self.issue_fetch(index),
            FetchDecision::OnDeck { index, superseded } => {
                trace!(index, ?superseded, "Page fetch queued on deck");
                Ok(())
            }
        }
    }

    fn issue_fetch(&self, index: u32) -> ViewResult<()> {
        trace!(index, "Requesting page");
        if let Err(err) = self.array.request_guid_by_index(index) {
            self.fetch.borrow_mut().issue_failed();
            let row_count = self.index.get().row_count();
            self.cache
                .borrow_mut()
                .set_page_status(index, PageStatus::Uncached, row_count);
            return Err(err.into());
        }
        Ok(())
    }

    /// Completion of a page fetch started by [`Self::request_page`].
    pub(super) fn on_guid_by_index(
        &self,
        index: u32,
        result: Result<Guid, ArrayError>,
    ) -> ViewResult<()> {
        if self.row_count_state.get() != RowCountState::Clean {
            let dropped = self.fetch.borrow_mut().abandon();
            debug!(index, ?dropped, "Ignoring page completion while row count is dirty");
            return Ok(());
        }

        let outcome = match result {
            Ok(_) => self.cache_page(index),
            Err(err) => {
                warn!(index, error = %err, "Page fetch failed");
                let row_count = self.index.get().row_count();
                self.cache
                    .borrow_mut()
                    .set_page_status(index, PageStatus::Uncached, row_count);
                Ok(())
            }
        };

        let next = self.fetch.borrow_mut().complete();
        let issued = match next {
            Some(next) => {
                let row_count = self.index.get().row_count();
                self.cache
                    .borrow_mut()
                    .set_page_status(next, PageStatus::Pending, row_count);
                self.issue_fetch(next)
            }
            None => Ok(()),
        };

        outcome.and(issued)
    }

    /// Copies the now-resident page holding `index` into the row cache.
    fn cache_page(&self, index: u32) -> ViewResult<()> {
        let paged = self.index.get();
        let row_count = paged.row_count();
        let Some(range) = self.cache.borrow().page_range(index, paged.length()) else {
            debug!(index, length = paged.length(), "Completed page lies past the end");
            return Ok(());
        };
        let (start, end) = (*range.start(), *range.end());

        let resolved = match self.resolve_page(start, end) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.cache
                    .borrow_mut()
                    .set_page_status(index, PageStatus::Uncached, row_count);
                warn!(index, error = %err, "Array changed during page completion");
                return Ok(());
            }
        };

        if self.manages_selection() {
            let ids: Vec<Option<String>> = resolved.iter().map(|(_, id)| id.clone()).collect();
            self.restore_page_selection(start, &ids);
        }

        let guids: Vec<Guid> = resolved.into_iter().map(|(guid, _)| guid).collect();
        let stored = self
            .property_cache
            .properties(&guids)
            .map_err(ViewError::from)
            .and_then(|bags| self.store_page(start, &guids, bags));
        if let Err(err) = stored {
            self.cache
                .borrow_mut()
                .set_page_status(index, PageStatus::Uncached, row_count);
            return Err(err);
        }
        self.cache
            .borrow_mut()
            .set_page_status(index, PageStatus::Cached, row_count);

        if let Some(tree) = self.tree() {
            tree.invalidate_range(paged.to_row(start), paged.to_row(end));
        }
        debug!(start, end, "Cached page");
        Ok(())
    }

    /// GUIDs of `start..=end`, with selection identifiers when a pending
    /// explicit selection needs them.
    fn resolve_page(
        &self,
        start: u32,
        end: u32,
    ) -> Result<Vec<(Guid, Option<String>)>, ArrayError> {
        let needs_ids = self.manages_selection() && self.reconciler.borrow().has_pending();
        let mut resolved = Vec::with_capacity((end - start + 1) as usize);
        for index in start..=end {
            let guid = self.array.guid_by_index(index)?;
            let id = if needs_ids {
                Some(self.unique_id_for_index(index)?)
            } else {
                None
            };
            resolved.push((guid, id));
        }
        Ok(resolved)
    }

    fn store_page(
        &self,
        start: u32,
        guids: &[Guid],
        bags: Vec<Option<Arc<PropertyBag>>>,
    ) -> ViewResult<()> {
        let mut cache = self.cache.borrow_mut();
        for (offset, (guid, bag)) in guids.iter().zip(bags).enumerate() {
            match bag {
                Some(bag) => cache.put(start + offset as u32, bag)?,
                None => warn!(index = start + offset as u32, guid = %guid, "No properties for item"),
            }
        }
        Ok(())
    }
}
