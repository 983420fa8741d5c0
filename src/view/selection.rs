//! Selection that survives rebuilds.
//!
//! Distinct-value lists own their selection. It is either "everything" or a
//! set of stable identifiers that are replayed onto rows as their pages arrive.
//! Other lists delegate selection to the hosting view and never touch this.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace};

use super::{ListKind, MediaTreeView, PagedIndex, RowCountState};
use crate::array::{ArrayListener, GuidArray};
use crate::error::{ArrayError, ViewResult};
use crate::models::{Guid, SelectionEntries, SelectionState, ViewState};
use crate::tree::{SelectionEvent, TreeSelection};

/// Suppresses selection-changed notifications until dropped.
///
/// Restores the previous suppression state, so guards nest.
pub struct SelectEventsGuard {
    selection: Rc<dyn TreeSelection>,
    previous: bool,
}

impl SelectEventsGuard {
    pub fn new(selection: Rc<dyn TreeSelection>) -> Self {
        let previous = selection.select_events_suppressed();
        selection.set_select_events_suppressed(true);
        Self {
            selection,
            previous,
        }
    }
}

impl Drop for SelectEventsGuard {
    fn drop(&mut self) {
        self.selection.set_select_events_suppressed(self.previous);
    }
}

/// Self-managed selection state of a distinct-value list.
#[derive(Debug, Default)]
pub struct SelectionReconciler {
    all: bool,
    /// Identifiers waiting for their rows to be fetched.
    pending: SelectionEntries,
    clear_pending: bool,
}

impl SelectionReconciler {
    pub fn new(all: bool) -> Self {
        Self {
            all,
            ..Self::default()
        }
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn mark_all_selected(&mut self) {
        self.all = true;
        self.pending.clear();
    }

    /// Replaces the selection with `entries`, to be replayed as pages arrive.
    pub fn mark_explicit(&mut self, entries: SelectionEntries) {
        self.all = false;
        self.pending = entries;
    }

    /// Adds identifiers without dropping those still waiting for their rows.
    pub fn remember(&mut self, entries: SelectionEntries) {
        self.pending.extend(entries);
    }

    pub fn pending(&self) -> &SelectionEntries {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Postpones clearing the visible selection until fresh rows arrive.
    pub fn defer_clear(&mut self) {
        self.clear_pending = true;
    }

    pub fn clear_is_deferred(&self) -> bool {
        self.clear_pending
    }

    /// Consumes the deferred clear. True at most once per [`Self::defer_clear`].
    pub fn take_deferred_clear(&mut self) -> bool {
        std::mem::take(&mut self.clear_pending)
    }

    /// Indices among `start..` to select, given each index's identifier.
    ///
    /// Each pending identifier matches at most once and is consumed.
    pub fn on_page_fetched(
        &mut self,
        start: u32,
        ids: &[Option<String>],
        synthetic_row: bool,
    ) -> Vec<u32> {
        if self.all {
            if synthetic_row {
                return Vec::new();
            }
            return (start..start + ids.len() as u32).collect();
        }

        ids.iter()
            .enumerate()
            .filter_map(|(offset, id)| {
                let id = id.as_ref()?;
                self.pending.remove(id)?;
                Some(start + offset as u32)
            })
            .collect()
    }

    /// Snapshot of the selection. `selected` is only consulted when the
    /// selection is explicit; identifiers still waiting for their rows count
    /// as selected.
    pub fn capture(
        &self,
        selected: impl FnOnce() -> Result<SelectionEntries, ArrayError>,
    ) -> Result<SelectionState, ArrayError> {
        if self.all {
            return Ok(SelectionState::AllSelected);
        }
        let mut entries = self.pending.clone();
        entries.extend(selected()?);
        Ok(SelectionState::Explicit(entries))
    }
}

/// Identifier of the row at array `index` that survives re-sorting.
///
/// The value itself for distinct lists, `list|guid|rowid` otherwise.
fn stable_id(
    array: &dyn GuidArray,
    kind: ListKind,
    list_guid: &str,
    index: u32,
) -> Result<String, ArrayError> {
    if kind.is_distinct() {
        return array.sort_value_by_index(index);
    }
    let guid = array.guid_by_index(index)?;
    let rowid = array.rowid_by_index(index)?;
    Ok(format!("{list_guid}|{guid}|{rowid}"))
}

/// The parts of a view its array's invalidate hook needs.
///
/// Shared with the view, and registered on the array as an [`ArrayListener`]
/// so a distinct list's selection is remembered whenever the array is about to
/// re-sort, whoever asked for it.
pub(super) struct SelectionKeeper {
    kind: ListKind,
    list_guid: Guid,
    pub(super) selection: RefCell<Option<Rc<dyn TreeSelection>>>,
    index: Rc<Cell<PagedIndex>>,
    reconciler: Rc<RefCell<SelectionReconciler>>,
}

impl SelectionKeeper {
    pub(super) fn new(
        kind: ListKind,
        list_guid: Guid,
        index: Rc<Cell<PagedIndex>>,
        reconciler: Rc<RefCell<SelectionReconciler>>,
    ) -> Self {
        Self {
            kind,
            list_guid,
            selection: RefCell::new(None),
            index,
            reconciler,
        }
    }

    /// Identifier -> GUID for every selected row, skipping the synthetic row.
    fn enumerate(&self, array: &dyn GuidArray) -> Result<SelectionEntries, ArrayError> {
        let mut entries = SelectionEntries::new();
        let Some(selection) = self.selection.borrow().clone() else {
            return Ok(entries);
        };

        let paged = self.index.get();
        for (first, last) in selection.ranges() {
            for row in first..=last {
                if !paged.contains_row(row) {
                    break;
                }
                let Some(index) = paged.to_array_index(row) else {
                    continue;
                };
                let id = stable_id(array, self.kind, &self.list_guid, index)?;
                entries.insert(id, array.guid_by_index(index)?);
            }
        }
        Ok(entries)
    }

    /// Adds the visible selection to the identifiers waiting for their rows.
    fn save(&self, array: &dyn GuidArray) -> Result<(), ArrayError> {
        if !self.kind.is_distinct() || self.reconciler.borrow().is_all() {
            return Ok(());
        }
        let entries = self.enumerate(array)?;
        debug!(count = entries.len(), "Saved selection before invalidate");
        self.reconciler.borrow_mut().remember(entries);
        Ok(())
    }
}

impl ArrayListener for SelectionKeeper {
    fn on_before_invalidate(&self, array: &dyn GuidArray) -> Result<(), ArrayError> {
        self.save(array)
    }
}

impl MediaTreeView {
    /// Identifier of the row at array `index` that survives re-sorting.
    pub fn unique_id_for_index(&self, index: u32) -> Result<String, ArrayError> {
        stable_id(&*self.array, self.kind, &self.list_guid, index)
    }

    /// Replays the pending selection onto a freshly cached page.
    pub(super) fn restore_page_selection(&self, start: u32, ids: &[Option<String>]) {
        let Some(selection) = self.tree_selection() else {
            return;
        };
        let _suppressed = SelectEventsGuard::new(selection.clone());

        let paged = self.index.get();
        let (clear, all, rows) = {
            let mut reconciler = self.reconciler.borrow_mut();
            let clear = reconciler.take_deferred_clear();
            let rows = if self.tree().is_some() {
                reconciler.on_page_fetched(start, ids, paged.has_synthetic_row())
            } else {
                Vec::new()
            };
            (clear, reconciler.is_all(), rows)
        };

        if clear {
            if all {
                selection.select(0);
            } else {
                selection.clear_selection();
            }
        }

        for index in rows {
            let row = paged.to_row(index);
            selection.ranged_select(row, row, true);
        }
        trace!(start, cleared = clear, "Restored page selection");
    }

    fn enumerate_selection(&self) -> Result<SelectionEntries, ArrayError> {
        self.keeper.enumerate(&*self.array)
    }

    /// Saves the visible selection before the array forgets its order.
    ///
    /// The array runs this itself from [`GuidArray::invalidate`]; hosts only
    /// call it for arrays that re-sort without invalidating.
    pub fn on_before_invalidate(&self) -> ViewResult<()> {
        Ok(self.keeper.save(&*self.array)?)
    }

    /// Persistable snapshot of sort and selection.
    pub fn capture_state(&self) -> ViewResult<ViewState> {
        let sort = self.sort.borrow().clone();
        let selection = if self.manages_selection() {
            self.reconciler
                .borrow()
                .capture(|| self.enumerate_selection())?
        } else {
            SelectionState::default()
        };
        Ok(ViewState::new(sort, selection))
    }

    /// Marks everything selected. Distinct lists only.
    pub fn mark_all_selected(&self) {
        if self.manages_selection() {
            self.reconciler.borrow_mut().mark_all_selected();
        }
    }

    /// Replaces the selection with explicit identifiers. Distinct lists only.
    pub fn mark_explicit(&self, entries: SelectionEntries) {
        if self.manages_selection() {
            self.reconciler.borrow_mut().mark_explicit(entries);
        }
    }

    /// Folds a user selection change into the self-managed state: picking the
    /// synthetic row means "all".
    pub fn on_user_selection_changed(&self) {
        if !self.manages_selection() {
            return;
        }
        let Some(selection) = self.tree_selection() else {
            return;
        };
        if selection.select_events_suppressed() {
            return;
        }
        let all = self.index.get().has_synthetic_row() && selection.is_selected(0);
        let mut reconciler = self.reconciler.borrow_mut();
        if all {
            reconciler.mark_all_selected();
        } else if reconciler.is_all() {
            reconciler.mark_explicit(SelectionEntries::new());
        }
    }

    pub(super) fn handle_selection_event(&self, event: SelectionEvent) {
        match event {
            SelectionEvent::SelectionChanged => self.on_selection_changed(),
            SelectionEvent::CurrentIndexChanged => self.on_current_index_changed(),
        }
    }

    /// The host's selection changed. Lists that delegate selection repaint.
    pub fn on_selection_changed(&self) {
        if self.manages_selection() || self.tree_selection().is_none() {
            return;
        }
        if let Some(tree) = self.tree() {
            tree.invalidate();
        }
    }

    /// Mirrors the host's current index into the grid selection.
    pub fn on_current_index_changed(&self) {
        let (Some(selection), Some(view_selection)) =
            (self.tree_selection(), self.view_selection.as_ref())
        else {
            return;
        };
        selection.set_current_index(view_selection.current_index());
    }

    /// Brings the grid's selection of `row` in line with the host's.
    pub(super) fn sync_row_selection(&self, row: u32) {
        if self.manages_selection() || self.row_count_state.get() != RowCountState::Clean {
            return;
        }
        let (Some(selection), Some(view_selection)) =
            (self.tree_selection(), self.view_selection.as_ref())
        else {
            return;
        };
        if view_selection.is_index_selected(row) != selection.is_selected(row) {
            let _suppressed = SelectEventsGuard::new(selection.clone());
            selection.toggle_select(row);
        }
    }
}
