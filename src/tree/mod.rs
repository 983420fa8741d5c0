//! Interfaces of the UI grid and the services around it.
//!
//! Every trait here is a capability the host hands to the view. They are kept
//! small so each can be replaced by a scripted fake in tests.

pub mod range_selection;

pub use range_selection::RangeSelection;

use std::rc::Rc;

use flume::Sender;

use crate::array::ListenerId;
use crate::error::ViewResult;
use crate::models::{Guid, SortDescriptor};

/// A grid column and the property it displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeColumn {
    pub index: u32,
    /// Property id bound to the column.
    pub property: String,
}

impl TreeColumn {
    pub fn new(index: u32, property: impl Into<String>) -> Self {
        Self {
            index,
            property: property.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        }
    }
}

/// Where a drop lands relative to the target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOrientation {
    Before,
    On,
    After,
}

/// Pointer interaction with a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseState {
    #[default]
    None,
    Hover,
    Active,
}

/// The grid widget's repaint and layout surface.
pub trait TreeBox {
    /// First and last visible rows, inclusive. `None` when nothing is shown.
    fn visible_rows(&self) -> Option<(u32, u32)>;

    fn columns(&self) -> Vec<TreeColumn>;

    /// `delta` rows were inserted (positive) or removed (negative) at `first`.
    fn row_count_changed(&self, first: u32, delta: i64);

    fn invalidate(&self);

    /// Repaints rows `first..=last`.
    fn invalidate_range(&self, first: u32, last: u32);

    fn invalidate_row(&self, row: u32);

    fn invalidate_cell(&self, row: u32, column: &TreeColumn);

    fn begin_update_batch(&self);

    fn end_update_batch(&self);

    /// Decorates a column header. `None` clears the indicator.
    fn set_sort_direction(&self, column: &TreeColumn, direction: Option<SortDirection>);
}

/// The grid's native row selection.
pub trait TreeSelection {
    fn select(&self, row: u32);

    /// Selects `first..=last`. Without `augment` the old selection is replaced.
    fn ranged_select(&self, first: u32, last: u32, augment: bool);

    fn clear_selection(&self);

    fn toggle_select(&self, row: u32);

    fn is_selected(&self, row: u32) -> bool;

    /// Selected rows as inclusive contiguous ranges, ascending.
    fn ranges(&self) -> Vec<(u32, u32)>;

    /// While suppressed, mutations fire no selection-changed notification.
    fn set_select_events_suppressed(&self, suppressed: bool);

    fn select_events_suppressed(&self) -> bool;

    fn set_current_index(&self, row: Option<u32>);
}

/// Change notifications from the host's selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    SelectionChanged,
    CurrentIndexChanged,
}

/// Selection kept by the hosting list view, in array indices.
pub trait ViewSelection {
    fn is_index_selected(&self, index: u32) -> bool;

    fn current_index(&self) -> Option<u32>;

    fn add_listener(&self, sender: Sender<SelectionEvent>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// The list view hosting the grid.
pub trait MediaListHost {
    /// GUID of the displayed list.
    fn list_guid(&self) -> Guid;

    fn is_sortable(&self) -> bool;

    /// Applies a sort through the host's own filter/sort machinery.
    fn set_sort(&self, sort: &SortDescriptor) -> ViewResult<()>;

    /// Current stored value of a property of the item identified by `guid`.
    fn item_property(&self, guid: &str, property: &str) -> ViewResult<Option<String>>;

    /// Writes a property of the item identified by `guid`.
    fn set_item_property(&self, guid: &str, property: &str, value: &str) -> ViewResult<()>;

    /// Array index of the entry a playback view item refers to.
    fn index_for_view_item_uid(&self, view_item_uid: &str) -> Option<u32>;

    fn selection(&self) -> Rc<dyn ViewSelection>;
}

/// Receives drag/drop and header clicks on behalf of the view.
pub trait TreeViewObserver {
    fn can_drop(&self, row: u32, orientation: DropOrientation) -> bool;

    fn on_drop(&self, row: u32, orientation: DropOrientation);

    fn on_cycle_header(&self, column: &TreeColumn);
}

/// The track the playback service is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub list_guid: Guid,
    pub view_item_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    TrackChange(NowPlaying),
    Stop,
}

pub trait PlaybackService {
    fn add_listener(&self, sender: Sender<PlaybackEvent>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn now_playing(&self) -> Option<NowPlaying>;
}
