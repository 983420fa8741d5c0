//! The view a UI grid queries for rows.
//!
//! A [`MediaTreeView`] answers every grid query synchronously from its page
//! cache and pulls missing pages from the backing [`GuidArray`] in the
//! background. Answers arrive as [`ArrayEvent`]s on a channel that the host
//! drains through [`MediaTreeView::pump`] on a later turn of its event loop.
//!
//! - Row count is fetched lazily and re-fetched after every rebuild
//! - At most one page fetch in flight, at most one waiting behind it
//! - Distinct-value lists get a leading "all" row and keep their own selection
//! - Everything runs on the host's thread; no locks

mod cells;
pub mod fetch;
mod key_nav;
pub mod page_cache;
pub mod paged_index;
mod playback;
pub mod selection;

pub use cells::MouseTarget;
pub use fetch::{FetchCoordinator, FetchDecision, FetchState};
pub use page_cache::{PageCache, PageStatus};
pub use paged_index::PagedIndex;
pub use selection::{SelectEventsGuard, SelectionReconciler};

use selection::SelectionKeeper;

use std::cell::{Cell, RefCell};
use std::ops::RangeInclusive;
use std::rc::{Rc, Weak};

use flume::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use crate::array::{ArrayEvent, ArrayListener, ArrayState, GuidArray, ListenerId, PropertyCache};
use crate::config::ViewConfig;
use crate::error::{ArrayError, ViewError, ViewResult};
use crate::models::{Guid, PropertyManager, SelectionState, SortDescriptor, ViewState};
use crate::tree::{
    MediaListHost, PlaybackEvent, PlaybackService, SelectionEvent, SortDirection, TreeBox,
    TreeColumn, TreeSelection, TreeViewObserver, ViewSelection,
};

/// What kind of list the backing array enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Every item of the library.
    Library,
    /// Entries of one ordered list, duplicates allowed.
    Simple,
    /// Distinct values of one property.
    Distinct,
}

impl ListKind {
    pub fn is_distinct(self) -> bool {
        self == ListKind::Distinct
    }
}

/// Trust level of the cached row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountState {
    Clean,
    /// Something changed; the next [`MediaTreeView::row_count`] asks again.
    Dirty,
    /// A length request is in flight.
    LengthPending,
}

/// Builder for [`MediaTreeView`].
///
/// Exactly one of [`Self::sort`] and [`Self::state`] must be given.
pub struct TreeViewBuilder {
    array: Rc<dyn GuidArray>,
    host: Rc<dyn MediaListHost>,
    properties: Rc<dyn PropertyManager>,
    playback: Option<Rc<dyn PlaybackService>>,
    config: ViewConfig,
    sort: Option<SortDescriptor>,
    state: Option<ViewState>,
}

impl TreeViewBuilder {
    pub fn new(
        array: Rc<dyn GuidArray>,
        host: Rc<dyn MediaListHost>,
        properties: Rc<dyn PropertyManager>,
    ) -> Self {
        Self {
            array,
            host,
            properties,
            playback: None,
            config: ViewConfig::default(),
            sort: None,
            state: None,
        }
    }

    /// Playback service used for the "playing" decoration.
    pub fn playback(mut self, playback: Rc<dyn PlaybackService>) -> Self {
        self.playback = Some(playback);
        self
    }

    pub fn config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts from a fresh sort.
    pub fn sort(mut self, sort: SortDescriptor) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Starts from a state captured by [`MediaTreeView::capture_state`].
    pub fn state(mut self, state: ViewState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> ViewResult<MediaTreeView> {
        let sort = match (self.sort, &self.state) {
            (Some(_), Some(_)) => {
                return Err(ViewError::InvalidArgument(
                    "both an initial sort and a saved state were given".into(),
                ))
            }
            (None, None) => {
                return Err(ViewError::InvalidArgument(
                    "an initial sort or a saved state is required".into(),
                ))
            }
            (Some(sort), None) => sort,
            (None, Some(state)) => state.sort.clone(),
        };
        if sort.property.is_empty() {
            return Err(ViewError::InvalidArgument("empty sort property".into()));
        }

        let kind = if self.array.is_distinct() {
            ListKind::Distinct
        } else {
            let table = self.array.base_table();
            if table == self.config.library_table {
                ListKind::Library
            } else if table == self.config.simple_list_table {
                ListKind::Simple
            } else {
                return Err(ViewError::InvalidArgument(format!(
                    "unknown base table {table:?}"
                )));
            }
        };

        let mut reconciler = SelectionReconciler::new(kind.is_distinct());
        if kind.is_distinct() {
            match self.state.as_ref().map(|state| &state.selection) {
                Some(SelectionState::AllSelected) => reconciler.mark_all_selected(),
                Some(SelectionState::Explicit(entries)) => {
                    reconciler.mark_explicit(entries.clone())
                }
                None => {}
            }
        }

        let view_selection = (!kind.is_distinct()).then(|| self.host.selection());
        let playback = if kind.is_distinct() {
            None
        } else {
            self.playback
        };

        let fetch_size = self.array.fetch_size();
        let list_guid = self.host.list_guid();
        let property_cache = self.array.property_cache();

        let index = Rc::new(Cell::new(PagedIndex::new(kind.is_distinct())));
        let reconciler = Rc::new(RefCell::new(reconciler));
        let keeper = Rc::new(SelectionKeeper::new(
            kind,
            list_guid.clone(),
            index.clone(),
            reconciler.clone(),
        ));

        let (array_tx, array_events) = flume::unbounded();
        let array_listener = self.array.add_async_listener(array_tx);
        let hook: Rc<dyn ArrayListener> = keeper.clone();
        let invalidate_listener = self.array.add_listener(Rc::downgrade(&hook));
        let (playback_tx, playback_events) = flume::unbounded();
        let (selection_tx, selection_events) = flume::unbounded();
        let selection_listener = view_selection
            .as_ref()
            .map(|selection| selection.add_listener(selection_tx));

        info!(
            list = %list_guid,
            ?kind,
            fetch_size,
            sort = %sort.property,
            ascending = sort.ascending,
            "Tree view bound"
        );

        Ok(MediaTreeView {
            config: self.config,
            kind,
            list_guid,
            array: self.array,
            property_cache,
            host: self.host,
            view_selection,
            properties: self.properties,
            playback,
            tree: RefCell::new(None),
            observer: RefCell::new(None),
            index,
            cache: RefCell::new(PageCache::new(fetch_size)),
            fetch: RefCell::new(FetchCoordinator::new()),
            reconciler,
            keeper,
            row_count_state: Cell::new(RowCountState::Dirty),
            length_requests: Cell::new(0),
            sort: RefCell::new(sort),
            array_busy: Cell::new(false),
            mouse: RefCell::new(None),
            playing_id: RefCell::new(None),
            array_events,
            array_listener: Cell::new(Some(array_listener)),
            invalidate_listener: Cell::new(Some(invalidate_listener)),
            playback_tx,
            playback_events,
            playback_listener: Cell::new(None),
            selection_events,
            selection_listener: Cell::new(selection_listener),
        })
    }
}

/// Windowed, asynchronously paged view over one media list.
pub struct MediaTreeView {
    config: ViewConfig,
    kind: ListKind,
    /// GUID of the displayed list; part of every non-distinct row identifier.
    list_guid: Guid,
    array: Rc<dyn GuidArray>,
    property_cache: Rc<dyn PropertyCache>,
    host: Rc<dyn MediaListHost>,
    /// The host's own selection. Only lists that delegate selection have one.
    view_selection: Option<Rc<dyn ViewSelection>>,
    properties: Rc<dyn PropertyManager>,
    playback: Option<Rc<dyn PlaybackService>>,
    tree: RefCell<Option<Rc<dyn TreeBox>>>,
    observer: RefCell<Option<Weak<dyn TreeViewObserver>>>,
    index: Rc<Cell<PagedIndex>>,
    cache: RefCell<PageCache>,
    fetch: RefCell<FetchCoordinator>,
    reconciler: Rc<RefCell<SelectionReconciler>>,
    /// Grid selection plus what the array's invalidate hook needs.
    keeper: Rc<SelectionKeeper>,
    row_count_state: Cell<RowCountState>,
    /// Length requests issued and not yet answered. Only the last answer counts.
    length_requests: Cell<u32>,
    /// Sort as requested, before any backend substitution.
    sort: RefCell<SortDescriptor>,
    array_busy: Cell<bool>,
    mouse: RefCell<Option<MouseTarget>>,
    /// Stable identifier of the playing row, if it belongs to this list.
    playing_id: RefCell<Option<String>>,
    array_events: Receiver<ArrayEvent>,
    array_listener: Cell<Option<ListenerId>>,
    invalidate_listener: Cell<Option<ListenerId>>,
    playback_tx: Sender<PlaybackEvent>,
    playback_events: Receiver<PlaybackEvent>,
    playback_listener: Cell<Option<ListenerId>>,
    selection_events: Receiver<SelectionEvent>,
    selection_listener: Cell<Option<ListenerId>>,
}

impl MediaTreeView {
    pub fn builder(
        array: Rc<dyn GuidArray>,
        host: Rc<dyn MediaListHost>,
        properties: Rc<dyn PropertyManager>,
    ) -> TreeViewBuilder {
        TreeViewBuilder::new(array, host, properties)
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn list_guid(&self) -> &str {
        &self.list_guid
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Whether the view owns its selection instead of delegating to the host.
    pub fn manages_selection(&self) -> bool {
        self.kind.is_distinct()
    }

    pub fn has_synthetic_row(&self) -> bool {
        self.index.get().has_synthetic_row()
    }

    pub fn row_count_state(&self) -> RowCountState {
        self.row_count_state.get()
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch.borrow().state()
    }

    /// Array index waiting behind the fetch in flight.
    pub fn on_deck_index(&self) -> Option<u32> {
        self.fetch.borrow().on_deck()
    }

    /// Cache status of the page holding array `index`.
    pub fn page_status(&self, index: u32) -> PageStatus {
        self.cache.borrow().page_status(index)
    }

    pub fn current_sort(&self) -> SortDescriptor {
        self.sort.borrow().clone()
    }

    pub fn is_array_busy(&self) -> bool {
        self.array_busy.get()
    }

    pub fn is_selection_all(&self) -> bool {
        self.manages_selection() && self.reconciler.borrow().is_all()
    }

    fn tree(&self) -> Option<Rc<dyn TreeBox>> {
        self.tree.borrow().clone()
    }

    fn tree_selection(&self) -> Option<Rc<dyn TreeSelection>> {
        self.keeper.selection.borrow().clone()
    }

    fn observer(&self) -> Option<Rc<dyn TreeViewObserver>> {
        self.observer.borrow().as_ref().and_then(Weak::upgrade)
    }

    // =====================================================================
    // Binding
    // =====================================================================

    /// Attaches (`Some`) or detaches (`None`) the grid.
    ///
    /// Attaching decorates the sort column, rebuilds and starts listening to
    /// playback. Detaching stops listening.
    pub fn set_tree(&self, tree: Option<Rc<dyn TreeBox>>) -> ViewResult<()> {
        let attached = tree.is_some();
        self.tree.replace(tree);

        if attached {
            let sort = self.current_sort();
            self.update_sort_indicators(&sort);
            self.rebuild()?;
        }
        self.manage_playback_listener(attached)
    }

    pub fn set_selection(&self, selection: Option<Rc<dyn TreeSelection>>) {
        self.keeper.selection.replace(selection);
    }

    /// Observer for drag/drop and header clicks. Held weakly.
    pub fn set_observer(&self, observer: Option<&Rc<dyn TreeViewObserver>>) {
        self.observer.replace(observer.map(Rc::downgrade));
    }

    /// Deregisters every listener and drops the grid. Safe to call twice.
    pub fn unbind(&self) {
        let listener = self.array_listener.take();
        if let Some(id) = listener {
            if !self.array.remove_async_listener(id) {
                debug!(?id, "Array listener was already gone");
            }
        }
        if let Some(id) = self.invalidate_listener.take() {
            self.array.remove_listener(id);
        }
        if let (Some(view_selection), Some(id)) =
            (self.view_selection.as_ref(), self.selection_listener.take())
        {
            view_selection.remove_listener(id);
        }
        self.stop_playback_listener();

        self.tree.replace(None);
        self.keeper.selection.replace(None);
        self.observer.replace(None);
        self.mouse.replace(None);

        if listener.is_some() {
            info!(list = %self.list_guid, "Tree view unbound");
        }
    }

    // =====================================================================
    // Events
    // =====================================================================

    /// Handles every array, playback and host selection event received so far.
    ///
    /// A failing event is logged and does not stop the others. Returns the
    /// number of events handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;

        while let Ok(event) = self.array_events.try_recv() {
            if let Err(err) = self.handle_array_event(event) {
                warn!(error = %err, "Array event failed");
            }
            handled += 1;
        }

        while let Ok(event) = self.playback_events.try_recv() {
            if let Err(err) = self.handle_playback_event(event) {
                warn!(error = %err, "Playback event failed");
            }
            handled += 1;
        }

        while let Ok(event) = self.selection_events.try_recv() {
            self.handle_selection_event(event);
            handled += 1;
        }

        if handled > 0 {
            trace!(handled, "Pumped view events");
        }
        handled
    }

    pub fn handle_array_event(&self, event: ArrayEvent) -> ViewResult<()> {
        match event {
            ArrayEvent::Length(result) => self.on_length(result),
            ArrayEvent::GuidByIndex { index, result } => self.on_guid_by_index(index, result),
            ArrayEvent::StateChange(state) => {
                self.array_busy.set(state == ArrayState::Busy);
                Ok(())
            }
        }
    }

    // =====================================================================
    // Row Count
    // =====================================================================

    /// Row count the grid should display, synthetic row included.
    ///
    /// While the count is dirty this asks the array for a fresh length and
    /// keeps answering the old count until it arrives.
    pub fn row_count(&self) -> ViewResult<u32> {
        if self.row_count_state.get() == RowCountState::Dirty {
            self.array.request_length()?;
            self.length_requests.set(self.length_requests.get() + 1);
            self.row_count_state.set(RowCountState::LengthPending);
            trace!("Requested array length");
        }
        Ok(self.index.get().row_count())
    }

    /// Drops cached rows and recounts. Visible rows stay displayable until
    /// fresh pages replace them.
    pub fn rebuild(&self) -> ViewResult<()> {
        if self.manages_selection()
            && self.tree_selection().is_some()
            && !self.reconciler.borrow().is_all()
        {
            self.reconciler.borrow_mut().defer_clear();
        }

        let visible = self.visible_indices();
        self.cache.borrow_mut().invalidate(visible)?;
        self.row_count_state.set(RowCountState::Dirty);
        debug!(list = %self.list_guid, "Rebuilding");
        self.row_count().map(|_| ())
    }

    /// Array indices of the visible rows, clamped to the current length.
    fn visible_indices(&self) -> Option<RangeInclusive<u32>> {
        let (first, last) = self.tree()?.visible_rows()?;
        let paged = self.index.get();
        let length = paged.length();
        if length == 0 {
            return None;
        }
        let first = first.saturating_sub(paged.offset());
        let last = last.checked_sub(paged.offset())?.min(length - 1);
        (first <= last).then_some(first..=last)
    }

    fn on_length(&self, result: Result<u32, ArrayError>) -> ViewResult<()> {
        let outstanding = self.length_requests.get().saturating_sub(1);
        self.length_requests.set(outstanding);
        if outstanding > 0 {
            debug!(outstanding, "Ignoring superseded length");
            return Ok(());
        }

        match result {
            Ok(length) => self.update_row_count(length),
            Err(err) => {
                warn!(error = %err, "Length request failed");
                self.row_count_state.set(RowCountState::Dirty);
                Ok(())
            }
        }
    }

    fn update_row_count(&self, length: u32) -> ViewResult<()> {
        let mut paged = self.index.get();
        let old = paged.row_count();
        paged.set_length(length);
        self.index.set(paged);
        self.row_count_state.set(RowCountState::Clean);

        let new = paged.row_count();
        debug!(old, new, "Row count updated");

        let Some(tree) = self.tree() else {
            return Ok(());
        };
        tree.begin_update_batch();
        if new != old {
            tree.row_count_changed(old.min(new), i64::from(new) - i64::from(old));
        }
        tree.invalidate();
        tree.end_update_batch();

        // The synthetic row never arrives through a page fetch.
        if paged.has_synthetic_row() && self.is_selection_all() {
            if let Some(selection) = self.tree_selection() {
                let _suppressed = SelectEventsGuard::new(selection.clone());
                selection.select(0);
            }
        }
        Ok(())
    }

    // =====================================================================
    // Sorting
    // =====================================================================

    /// Sorts the list by `property`.
    ///
    /// Fails with [`ViewError::NotSortable`] and changes nothing when the list
    /// refuses sorting. Distinct lists re-sort their own array and rebuild;
    /// other lists go through the host, then rebuild.
    pub fn set_sort(&self, property: &str, ascending: bool) -> ViewResult<()> {
        if property.is_empty() {
            return Err(ViewError::InvalidArgument("empty sort property".into()));
        }
        if !self.host.is_sortable() {
            return Err(ViewError::NotSortable);
        }

        // The library has no ordinal; creation order stands in for it.
        let backend_property =
            if self.kind == ListKind::Library && property == self.config.ordinal_property {
                self.config.created_property.as_str()
            } else {
                property
            };

        // The array's invalidate hook saves a distinct list's selection.
        if self.kind.is_distinct() {
            self.array.clear_sorts()?;
            self.array.add_sort(backend_property, ascending)?;
            self.array.invalidate()?;
        } else {
            self.host
                .set_sort(&SortDescriptor::new(backend_property, ascending))?;
        }
        self.rebuild()?;

        let sort = SortDescriptor::new(property, ascending);
        debug!(property, backend = backend_property, ascending, "Sort changed");
        self.update_sort_indicators(&sort);
        self.sort.replace(sort);
        Ok(())
    }

    /// Header click: sorts by the column, flipping direction on a re-click.
    ///
    /// Ignored while the array is busy or the list is not sortable.
    pub fn cycle_header(&self, column: &TreeColumn) -> ViewResult<()> {
        if self.array_busy.get() {
            debug!(column = %column.property, "Array busy, ignoring header click");
            return Ok(());
        }
        if !self.host.is_sortable() {
            return Ok(());
        }

        let ascending = {
            let sort = self.sort.borrow();
            sort.property != column.property || !sort.ascending
        };
        self.set_sort(&column.property, ascending)?;

        if let Some(observer) = self.observer() {
            observer.on_cycle_header(column);
        }
        Ok(())
    }

    fn update_sort_indicators(&self, sort: &SortDescriptor) {
        let Some(tree) = self.tree() else {
            debug!("No tree to decorate");
            return;
        };
        for column in tree.columns() {
            let direction = (column.property == sort.property)
                .then(|| SortDirection::from_ascending(sort.ascending));
            tree.set_sort_direction(&column, direction);
        }
    }
}

impl Drop for MediaTreeView {
    fn drop(&mut self) {
        self.unbind();
    }
}
