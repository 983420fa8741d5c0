//! `mlview`: drives a tree view over a seeded in-memory library from the
//! terminal, the way a grid widget would while scrolling and sorting.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::{Context, Result};
use flume::Sender;
use tracing::{debug, info, trace};

use media_list_view::models::{
    ArraySource, DurationProperty, Guid, MediaStore, PropertyBag, PropertySchema, RatingProperty,
    SortDescriptor, SqliteGuidArray, TextProperty,
};
use media_list_view::array::ListenerId;
use media_list_view::tree::{
    MediaListHost, RangeSelection, SelectionEvent, SortDirection, TreeBox, TreeColumn,
    ViewSelection,
};
use media_list_view::{ArrayError, GuidArray, MediaTreeView, StoreConfig, ViewError, ViewResult};

const VIEW_STATE_KEY: &str = "mlview.library";
const VISIBLE_ROWS: u32 = 12;
const COLUMNS: [&str; 5] = ["ordinal", "title", "artist", "rating", "duration"];

const ARTISTS: [&str; 6] = [
    "Autechre",
    "Boards of Canada",
    "Cocteau Twins",
    "Daft Punk",
    "Eno",
    "Four Tet",
];
const WORDS: [&str; 8] = [
    "amber", "bright", "cold", "drift", "ember", "fall", "glass", "harbor",
];

fn storage(err: anyhow::Error) -> ViewError {
    ArrayError::Storage(format!("{err:#}")).into()
}

/// Host list view backed directly by the store and the array.
struct StoreHost {
    store: Rc<MediaStore>,
    array: Rc<SqliteGuidArray>,
    selection: Rc<HostSelection>,
}

impl MediaListHost for StoreHost {
    fn list_guid(&self) -> Guid {
        "library".to_string()
    }

    fn is_sortable(&self) -> bool {
        true
    }

    fn set_sort(&self, sort: &SortDescriptor) -> ViewResult<()> {
        self.array.clear_sorts()?;
        self.array.add_sort(&sort.property, sort.ascending)?;
        self.array.invalidate()?;
        Ok(())
    }

    fn item_property(&self, guid: &str, property: &str) -> ViewResult<Option<String>> {
        self.store.item_property(guid, property).map_err(storage)
    }

    fn set_item_property(&self, guid: &str, property: &str, value: &str) -> ViewResult<()> {
        self.store
            .set_item_property(guid, property, value)
            .map_err(storage)?;
        self.array.store_property_cache().remove(guid);
        Ok(())
    }

    fn index_for_view_item_uid(&self, _view_item_uid: &str) -> Option<u32> {
        None
    }

    fn selection(&self) -> Rc<dyn ViewSelection> {
        self.selection.clone()
    }
}

#[derive(Default)]
struct HostSelection {
    selected: RefCell<BTreeSet<u32>>,
    listeners: RefCell<Vec<(ListenerId, Sender<SelectionEvent>)>>,
}

impl HostSelection {
    /// Selects only `index` and tells the listeners.
    fn select(&self, index: u32) {
        {
            let mut selected = self.selected.borrow_mut();
            selected.clear();
            selected.insert(index);
        }
        self.listeners.borrow_mut().retain(|(_, tx)| {
            tx.send(SelectionEvent::SelectionChanged).is_ok()
                && tx.send(SelectionEvent::CurrentIndexChanged).is_ok()
        });
    }
}

impl ViewSelection for HostSelection {
    fn is_index_selected(&self, index: u32) -> bool {
        self.selected.borrow().contains(&index)
    }

    fn current_index(&self) -> Option<u32> {
        self.selected.borrow().first().copied()
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

/// Fixed-height window onto the rows. Logs what a widget would repaint.
struct ConsoleTree {
    first: Cell<u32>,
    columns: Vec<TreeColumn>,
}

impl ConsoleTree {
    fn new() -> Self {
        Self {
            first: Cell::new(0),
            columns: COLUMNS
                .iter()
                .enumerate()
                .map(|(i, property)| TreeColumn::new(i as u32, *property))
                .collect(),
        }
    }

    fn scroll_to(&self, row: u32) {
        self.first.set(row);
    }
}

impl TreeBox for ConsoleTree {
    fn visible_rows(&self) -> Option<(u32, u32)> {
        let first = self.first.get();
        Some((first, first + VISIBLE_ROWS - 1))
    }

    fn columns(&self) -> Vec<TreeColumn> {
        self.columns.clone()
    }

    fn row_count_changed(&self, first: u32, delta: i64) {
        info!(first, delta, "Row count changed");
    }

    fn invalidate(&self) {
        trace!("Repaint all");
    }

    fn invalidate_range(&self, first: u32, last: u32) {
        debug!(first, last, "Repaint rows");
    }

    fn invalidate_row(&self, row: u32) {
        debug!(row, "Repaint row");
    }

    fn invalidate_cell(&self, row: u32, column: &TreeColumn) {
        trace!(row, column = %column.property, "Repaint cell");
    }

    fn begin_update_batch(&self) {}

    fn end_update_batch(&self) {}

    fn set_sort_direction(&self, column: &TreeColumn, direction: Option<SortDirection>) {
        if let Some(direction) = direction {
            info!(column = %column.property, ?direction, "Sort indicator");
        }
    }
}

fn seed(store: &MediaStore, count: u32) -> Result<()> {
    let items: Vec<PropertyBag> = (0..count as usize)
        .map(|i| {
            let title = format!(
                "{} {} {i}",
                WORDS[i % WORDS.len()],
                WORDS[(i / WORDS.len()) % WORDS.len()]
            );
            PropertyBag::new(format!("item-{i:05}"))
                .with("title", title)
                .with("artist", ARTISTS[i % ARTISTS.len()])
                .with("rating", (i % 6).to_string())
                .with("duration", (120_000 + (i % 240) * 1000).to_string())
        })
        .collect();
    let added = store.add_items(&items)?;
    info!(added, "Seeded library");
    Ok(())
}

/// Answers queued array requests until the view stops asking.
fn settle(array: &SqliteGuidArray, view: &MediaTreeView) {
    loop {
        let answered = array.process_pending();
        let handled = view.pump();
        if answered == 0 && handled == 0 {
            break;
        }
    }
}

/// Queries every visible cell, settles and prints the window.
fn render(array: &SqliteGuidArray, view: &MediaTreeView, tree: &ConsoleTree) -> Result<()> {
    let rows = view.row_count()?;
    let first = tree.first.get();
    let last = (first + VISIBLE_ROWS).min(rows);

    // First pass only starts fetches.
    for row in first..last {
        for column in &tree.columns {
            view.cell_text(row, column)?;
        }
    }
    settle(array, view);

    println!("rows {first}..{last} of {rows}");
    for row in first..last {
        let cells = tree
            .columns
            .iter()
            .map(|column| view.cell_text(row, column))
            .collect::<ViewResult<Vec<_>>>()?;
        let decorations = view.row_properties(row)?;
        println!(
            "  {:<5} {:<24} {:<18} {:<3} {:>6}  {decorations}",
            cells[0], cells[1], cells[2], cells[3], cells[4]
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_list_view=info".parse()?)
                .add_directive("mlview=info".parse()?),
        )
        .init();

    let count: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("item count must be a number")?,
        None => 1000,
    };

    let store = Rc::new(MediaStore::open_in_memory()?);
    seed(&store, count)?;

    let config = StoreConfig::default();
    let array = Rc::new(
        SqliteGuidArray::new(store.clone(), ArraySource::Library, &config)
            .sorted_by(SortDescriptor::ascending("title")),
    );
    let host = Rc::new(StoreHost {
        store: store.clone(),
        array: array.clone(),
        selection: Rc::new(HostSelection::default()),
    });
    let properties = Rc::new(
        PropertySchema::new()
            .register(TextProperty::new("title").editable())
            .register(TextProperty::new("artist"))
            .register(RatingProperty::new("rating"))
            .register(DurationProperty::new("duration")),
    );

    let view = MediaTreeView::builder(array.clone(), host.clone(), properties)
        .sort(SortDescriptor::ascending("title"))
        .build()?;
    let tree = Rc::new(ConsoleTree::new());
    view.set_selection(Some(Rc::new(RangeSelection::new())));
    view.set_tree(Some(tree.clone()))?;
    settle(&array, &view);

    // Jumping around leaves at most two fetches queued at any time.
    for row in [0, count / 2, count.saturating_sub(VISIBLE_ROWS)] {
        tree.scroll_to(row);
        render(&array, &view, &tree)?;
    }

    if let Some(row) = view.find_row_by_prefix("glass", 0)? {
        settle(&array, &view);
        info!(row, "Type-ahead match for \"glass\"");
        host.selection.select(row);
        tree.scroll_to(row);
        render(&array, &view, &tree)?;

        view.set_cell_text(row, &tree.columns[1], "glass (edited)")?;
        view.invalidate_rows_by_guid(&array.guid_by_index(row)?)?;
    }

    // Rating, then flip to highest first.
    view.cycle_header(&tree.columns[3])?;
    view.cycle_header(&tree.columns[3])?;
    settle(&array, &view);
    tree.scroll_to(0);
    render(&array, &view, &tree)?;

    let state = view.capture_state()?;
    store.save_view_state(VIEW_STATE_KEY, &state)?;
    if let Some(saved) = store.load_view_state(VIEW_STATE_KEY)? {
        info!(state = %saved, "View state saved");
    }

    view.unbind();
    Ok(())
}
