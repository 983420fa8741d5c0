//! Scripted collaborators for view tests.
//!
//! Nothing here answers asynchronously on its own: requests queue up until a
//! test calls [`FakeArray::complete_next`] or [`FakeArray::complete_all`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use flume::Sender;

use crate::array::{
    ArrayEvent, ArrayListener, ArrayListeners, ArrayState, GuidArray, ListenerId, PropertyCache,
};
use crate::error::{ArrayError, ViewResult};
use crate::models::{
    Guid, PropertyBag, PropertySchema, RatingProperty, SortDescriptor, TextProperty,
    LIBRARY_TABLE, SIMPLE_LIST_TABLE,
};
use crate::tree::{
    DropOrientation, MediaListHost, NowPlaying, PlaybackEvent, PlaybackService, RangeSelection,
    SelectionEvent, SortDirection, TreeBox, TreeColumn, TreeViewObserver, ViewSelection,
};
use crate::view::{MediaTreeView, TreeViewBuilder};

pub const LIST_GUID: &str = "list-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRequest {
    Length,
    GuidByIndex(u32),
}

#[derive(Debug, Clone)]
pub struct FakeRow {
    pub guid: Guid,
    pub sort_value: String,
    pub rowid: i64,
}

/// Bags keyed by guid, shared between the array and the tests.
#[derive(Default)]
pub struct FakeProperties {
    bags: RefCell<HashMap<Guid, Arc<PropertyBag>>>,
    calls: Cell<u32>,
}

impl FakeProperties {
    pub fn insert(&self, bag: PropertyBag) {
        self.bags
            .borrow_mut()
            .insert(bag.guid().to_string(), Arc::new(bag));
    }

    /// Batched lookups served so far.
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl PropertyCache for FakeProperties {
    fn properties(&self, guids: &[Guid]) -> Result<Vec<Option<Arc<PropertyBag>>>, ArrayError> {
        self.calls.set(self.calls.get() + 1);
        let bags = self.bags.borrow();
        Ok(guids.iter().map(|guid| bags.get(guid).cloned()).collect())
    }
}

pub struct FakeArray {
    rows: RefCell<Vec<FakeRow>>,
    distinct: bool,
    base_table: String,
    fetch_size: u32,
    requests: RefCell<VecDeque<FakeRequest>>,
    issued: RefCell<Vec<FakeRequest>>,
    listeners: RefCell<Vec<(ListenerId, Sender<ArrayEvent>)>>,
    invalidate_listeners: ArrayListeners,
    sorts: RefCell<Vec<SortDescriptor>>,
    invalidations: Cell<u32>,
    prefix_queries: Cell<u32>,
    sort_value_reads: Cell<u32>,
    properties: Rc<FakeProperties>,
}

impl FakeArray {
    /// `length` library items titled `title 0000`.. with fetch pages of `fetch_size`.
    pub fn library(length: u32, fetch_size: u32) -> Self {
        let titles: Vec<String> = (0..length).map(|i| format!("title {i:04}")).collect();
        let titles: Vec<&str> = titles.iter().map(String::as_str).collect();
        Self::with_titles(&titles, fetch_size)
    }

    /// One library item per title, in the given order.
    pub fn with_titles(titles: &[&str], fetch_size: u32) -> Self {
        let properties = Rc::new(FakeProperties::default());
        let rows = titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let guid = format!("g{i:04}");
                properties.insert(
                    PropertyBag::new(guid.clone())
                        .with("title", *title)
                        .with("rating", "3"),
                );
                FakeRow {
                    guid,
                    sort_value: title.to_lowercase(),
                    rowid: i as i64 + 1,
                }
            })
            .collect();

        Self {
            rows: RefCell::new(rows),
            distinct: false,
            base_table: LIBRARY_TABLE.to_string(),
            fetch_size,
            requests: RefCell::new(VecDeque::new()),
            issued: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            invalidate_listeners: ArrayListeners::default(),
            sorts: RefCell::new(Vec::new()),
            invalidations: Cell::new(0),
            prefix_queries: Cell::new(0),
            sort_value_reads: Cell::new(0),
            properties,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn simple_list(mut self) -> Self {
        self.base_table = SIMPLE_LIST_TABLE.to_string();
        self
    }

    pub fn base_table_named(mut self, table: &str) -> Self {
        self.base_table = table.to_string();
        self
    }

    pub fn properties(&self) -> Rc<FakeProperties> {
        self.properties.clone()
    }

    /// Every request issued so far, answered or not.
    pub fn issued(&self) -> Vec<FakeRequest> {
        self.issued.borrow().clone()
    }

    pub fn issued_fetches(&self) -> Vec<u32> {
        self.issued
            .borrow()
            .iter()
            .filter_map(|request| match request {
                FakeRequest::GuidByIndex(index) => Some(*index),
                FakeRequest::Length => None,
            })
            .collect()
    }

    pub fn queued(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn invalidate_listener_count(&self) -> usize {
        self.invalidate_listeners.len()
    }

    pub fn sorts(&self) -> Vec<SortDescriptor> {
        self.sorts.borrow().clone()
    }

    pub fn invalidations(&self) -> u32 {
        self.invalidations.get()
    }

    pub fn prefix_queries(&self) -> u32 {
        self.prefix_queries.get()
    }

    pub fn sort_value_reads(&self) -> u32 {
        self.sort_value_reads.get()
    }

    /// Removes the row at `index` without telling anyone.
    pub fn remove_row(&self, index: usize) {
        self.rows.borrow_mut().remove(index);
    }

    pub fn broadcast(&self, event: ArrayEvent) {
        for (_, tx) in self.listeners.borrow().iter() {
            let _ = tx.send(event.clone());
        }
    }

    /// Answers the oldest queued request. False when nothing is queued.
    pub fn complete_next(&self) -> bool {
        let Some(request) = self.requests.borrow_mut().pop_front() else {
            return false;
        };
        let event = match request {
            FakeRequest::Length => ArrayEvent::Length(self.length()),
            FakeRequest::GuidByIndex(index) => ArrayEvent::GuidByIndex {
                index,
                result: self.guid_by_index(index),
            },
        };
        self.broadcast(event);
        true
    }

    /// Answers the oldest queued request with an error.
    pub fn fail_next(&self, error: ArrayError) -> bool {
        let Some(request) = self.requests.borrow_mut().pop_front() else {
            return false;
        };
        let event = match request {
            FakeRequest::Length => ArrayEvent::Length(Err(error)),
            FakeRequest::GuidByIndex(index) => ArrayEvent::GuidByIndex {
                index,
                result: Err(error),
            },
        };
        self.broadcast(event);
        true
    }

    pub fn set_busy(&self, busy: bool) {
        let state = if busy { ArrayState::Busy } else { ArrayState::Idle };
        self.broadcast(ArrayEvent::StateChange(state));
    }

    pub fn complete_all(&self) -> usize {
        let mut answered = 0;
        while self.complete_next() {
            answered += 1;
        }
        answered
    }

    fn row(&self, index: u32) -> Result<FakeRow, ArrayError> {
        let rows = self.rows.borrow();
        rows.get(index as usize)
            .cloned()
            .ok_or(ArrayError::IndexOutOfRange {
                index,
                length: rows.len() as u32,
            })
    }

    fn queue(&self, request: FakeRequest) {
        self.requests.borrow_mut().push_back(request);
        self.issued.borrow_mut().push(request);
    }
}

impl GuidArray for FakeArray {
    fn length(&self) -> Result<u32, ArrayError> {
        Ok(self.rows.borrow().len() as u32)
    }

    fn request_length(&self) -> Result<(), ArrayError> {
        self.queue(FakeRequest::Length);
        Ok(())
    }

    fn guid_by_index(&self, index: u32) -> Result<Guid, ArrayError> {
        self.row(index).map(|row| row.guid)
    }

    fn request_guid_by_index(&self, index: u32) -> Result<(), ArrayError> {
        self.queue(FakeRequest::GuidByIndex(index));
        Ok(())
    }

    fn rowid_by_index(&self, index: u32) -> Result<i64, ArrayError> {
        self.row(index).map(|row| row.rowid)
    }

    fn sort_value_by_index(&self, index: u32) -> Result<String, ArrayError> {
        self.sort_value_reads.set(self.sort_value_reads.get() + 1);
        self.row(index).map(|row| row.sort_value)
    }

    fn first_index_by_prefix(&self, prefix: &str) -> Result<u32, ArrayError> {
        self.prefix_queries.set(self.prefix_queries.get() + 1);
        self.rows
            .borrow()
            .iter()
            .position(|row| row.sort_value.starts_with(prefix))
            .map(|index| index as u32)
            .ok_or_else(|| ArrayError::NotFound(prefix.to_string()))
    }

    fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }

    fn base_table(&self) -> String {
        self.base_table.clone()
    }

    fn clear_sorts(&self) -> Result<(), ArrayError> {
        self.sorts.borrow_mut().clear();
        Ok(())
    }

    fn add_sort(&self, property: &str, ascending: bool) -> Result<(), ArrayError> {
        self.sorts
            .borrow_mut()
            .push(SortDescriptor::new(property, ascending));
        Ok(())
    }

    /// Re-sorts the rows by sort value in the first sort's direction.
    fn invalidate(&self) -> Result<(), ArrayError> {
        self.invalidate_listeners.before_invalidate(self);
        self.invalidations.set(self.invalidations.get() + 1);
        let ascending = self.sorts.borrow().first().map_or(true, |s| s.ascending);
        let mut rows = self.rows.borrow_mut();
        rows.sort_by(|a, b| a.sort_value.cmp(&b.sort_value));
        if !ascending {
            rows.reverse();
        }
        Ok(())
    }

    fn add_listener(&self, listener: Weak<dyn ArrayListener>) -> ListenerId {
        self.invalidate_listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.invalidate_listeners.remove(id)
    }

    fn add_async_listener(&self, sender: Sender<ArrayEvent>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.borrow_mut().push((id, sender));
        id
    }

    fn remove_async_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn property_cache(&self) -> Rc<dyn PropertyCache> {
        self.properties.clone()
    }
}

#[derive(Default)]
pub struct FakeTree {
    pub visible: Cell<Option<(u32, u32)>>,
    pub columns: Vec<TreeColumn>,
    pub ranges: RefCell<Vec<(u32, u32)>>,
    pub rows: RefCell<Vec<u32>>,
    pub cells: RefCell<Vec<(u32, String)>>,
    pub invalidations: Cell<u32>,
    pub row_count_changes: RefCell<Vec<(u32, i64)>>,
    pub batches: Cell<u32>,
    pub sort_directions: RefCell<HashMap<String, Option<SortDirection>>>,
}

impl FakeTree {
    pub fn with_columns(properties: &[&str]) -> Self {
        Self {
            columns: properties
                .iter()
                .enumerate()
                .map(|(i, property)| TreeColumn::new(i as u32, *property))
                .collect(),
            ..Self::default()
        }
    }

    pub fn showing(self, first: u32, last: u32) -> Self {
        self.visible.set(Some((first, last)));
        self
    }
}

impl TreeBox for FakeTree {
    fn visible_rows(&self) -> Option<(u32, u32)> {
        self.visible.get()
    }

    fn columns(&self) -> Vec<TreeColumn> {
        self.columns.clone()
    }

    fn row_count_changed(&self, first: u32, delta: i64) {
        self.row_count_changes.borrow_mut().push((first, delta));
    }

    fn invalidate(&self) {
        self.invalidations.set(self.invalidations.get() + 1);
    }

    fn invalidate_range(&self, first: u32, last: u32) {
        self.ranges.borrow_mut().push((first, last));
    }

    fn invalidate_row(&self, row: u32) {
        self.rows.borrow_mut().push(row);
    }

    fn invalidate_cell(&self, row: u32, column: &TreeColumn) {
        self.cells.borrow_mut().push((row, column.property.clone()));
    }

    fn begin_update_batch(&self) {
        self.batches.set(self.batches.get() + 1);
    }

    fn end_update_batch(&self) {}

    fn set_sort_direction(&self, column: &TreeColumn, direction: Option<SortDirection>) {
        self.sort_directions
            .borrow_mut()
            .insert(column.property.clone(), direction);
    }
}

#[derive(Default)]
pub struct FakeViewSelection {
    pub selected: RefCell<BTreeSet<u32>>,
    pub current: Cell<Option<u32>>,
    listeners: RefCell<Vec<(ListenerId, Sender<SelectionEvent>)>>,
}

impl FakeViewSelection {
    pub fn emit(&self, event: SelectionEvent) {
        for (_, tx) in self.listeners.borrow().iter() {
            let _ = tx.send(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl ViewSelection for FakeViewSelection {
    fn is_index_selected(&self, index: u32) -> bool {
        self.selected.borrow().contains(&index)
    }

    fn current_index(&self) -> Option<u32> {
        self.current.get()
    }

    fn add_listener(&self, sender: Sender<SelectionEvent>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.borrow_mut().push((id, sender));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

pub struct FakeHost {
    pub sortable: Cell<bool>,
    pub sorts: RefCell<Vec<SortDescriptor>>,
    pub values: RefCell<HashMap<(Guid, String), String>>,
    pub writes: RefCell<Vec<(Guid, String, String)>>,
    pub view_items: RefCell<HashMap<String, u32>>,
    pub selection: Rc<FakeViewSelection>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            sortable: Cell::new(true),
            sorts: RefCell::new(Vec::new()),
            values: RefCell::new(HashMap::new()),
            writes: RefCell::new(Vec::new()),
            view_items: RefCell::new(HashMap::new()),
            selection: Rc::new(FakeViewSelection::default()),
        }
    }

    pub fn unsortable() -> Self {
        let host = Self::new();
        host.sortable.set(false);
        host
    }
}

impl MediaListHost for FakeHost {
    fn list_guid(&self) -> Guid {
        LIST_GUID.to_string()
    }

    fn is_sortable(&self) -> bool {
        self.sortable.get()
    }

    fn set_sort(&self, sort: &SortDescriptor) -> ViewResult<()> {
        self.sorts.borrow_mut().push(sort.clone());
        Ok(())
    }

    fn item_property(&self, guid: &str, property: &str) -> ViewResult<Option<String>> {
        Ok(self
            .values
            .borrow()
            .get(&(guid.to_string(), property.to_string()))
            .cloned())
    }

    fn set_item_property(&self, guid: &str, property: &str, value: &str) -> ViewResult<()> {
        self.values
            .borrow_mut()
            .insert((guid.to_string(), property.to_string()), value.to_string());
        self.writes
            .borrow_mut()
            .push((guid.to_string(), property.to_string(), value.to_string()));
        Ok(())
    }

    fn index_for_view_item_uid(&self, view_item_uid: &str) -> Option<u32> {
        self.view_items.borrow().get(view_item_uid).copied()
    }

    fn selection(&self) -> Rc<dyn ViewSelection> {
        self.selection.clone()
    }
}

#[derive(Default)]
pub struct FakeObserver {
    pub accept: bool,
    pub drops: RefCell<Vec<(u32, DropOrientation)>>,
    pub headers: RefCell<Vec<String>>,
}

impl TreeViewObserver for FakeObserver {
    fn can_drop(&self, _row: u32, _orientation: DropOrientation) -> bool {
        self.accept
    }

    fn on_drop(&self, row: u32, orientation: DropOrientation) {
        self.drops.borrow_mut().push((row, orientation));
    }

    fn on_cycle_header(&self, column: &TreeColumn) {
        self.headers.borrow_mut().push(column.property.clone());
    }
}

#[derive(Default)]
pub struct FakePlayback {
    listeners: RefCell<Vec<(ListenerId, Sender<PlaybackEvent>)>>,
    pub now: RefCell<Option<NowPlaying>>,
}

impl FakePlayback {
    pub fn emit(&self, event: PlaybackEvent) {
        for (_, tx) in self.listeners.borrow().iter() {
            let _ = tx.send(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl PlaybackService for FakePlayback {
    fn add_listener(&self, sender: Sender<PlaybackEvent>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.borrow_mut().push((id, sender));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn now_playing(&self) -> Option<NowPlaying> {
        self.now.borrow().clone()
    }
}

/// Title (editable), artist and rating.
pub fn schema() -> Rc<PropertySchema> {
    Rc::new(
        PropertySchema::new()
            .register(TextProperty::new("title").editable())
            .register(TextProperty::new("artist"))
            .register(RatingProperty::new("rating")),
    )
}

/// A view bound to fakes, with its length already answered.
pub struct Harness {
    pub array: Rc<FakeArray>,
    pub host: Rc<FakeHost>,
    pub tree: Rc<FakeTree>,
    pub selection: Rc<RangeSelection>,
    pub view: MediaTreeView,
}

impl Harness {
    /// Sorted by title ascending.
    pub fn new(array: FakeArray, tree: FakeTree) -> Self {
        Self::build(array, FakeHost::new(), tree, |builder| {
            builder.sort(SortDescriptor::ascending("title"))
        })
    }

    pub fn build(
        array: FakeArray,
        host: FakeHost,
        tree: FakeTree,
        configure: impl FnOnce(TreeViewBuilder) -> TreeViewBuilder,
    ) -> Self {
        let array = Rc::new(array);
        let host = Rc::new(host);
        let tree = Rc::new(tree);
        let selection = Rc::new(RangeSelection::new());

        let view = configure(MediaTreeView::builder(array.clone(), host.clone(), schema()))
            .build()
            .expect("view builds");
        view.set_selection(Some(selection.clone()));
        view.set_tree(Some(tree.clone())).expect("tree attaches");

        let harness = Self {
            array,
            host,
            tree,
            selection,
            view,
        };
        harness.settle();
        harness
    }

    /// Answers every queued request, including those issued while answering.
    pub fn settle(&self) {
        while self.array.complete_all() > 0 {
            self.view.pump();
        }
        self.view.pump();
    }

    /// Answers only the oldest queued request.
    pub fn step(&self) {
        self.array.complete_next();
        self.view.pump();
    }
}
