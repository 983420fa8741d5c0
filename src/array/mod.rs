//! Interfaces consumed from the backing GUID array.
//!
//! A GUID array is an ordered, sortable, paged sequence of media item GUIDs.
//! Synchronous lookups are answered from whatever the array has paged in and
//! may fail with [`ArrayError::IndexOutOfRange`] when the array changed under
//! the caller. Asynchronous requests never complete inside the call that issued
//! them. The answer arrives as an [`ArrayEvent`] on every registered listener
//! channel at a later turn of the host's event loop.
//!
//! The one synchronous notification is [`ArrayListener::on_before_invalidate`],
//! which runs inside [`GuidArray::invalidate`] while the old order is still
//! readable.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flume::Sender;
use tracing::warn;

use crate::error::ArrayError;
use crate::models::{Guid, PropertyBag};

/// Busy/idle state reported by an array while it runs queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayState {
    Busy,
    Idle,
}

/// Completion and state notifications delivered to async listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayEvent {
    /// Answer to [`GuidArray::request_length`].
    Length(Result<u32, ArrayError>),
    /// Answer to [`GuidArray::request_guid_by_index`]. On success the page
    /// containing `index` is resident and sync lookups into it will succeed.
    GuidByIndex {
        index: u32,
        result: Result<Guid, ArrayError>,
    },
    StateChange(ArrayState),
}

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Synchronous hook run by [`GuidArray::invalidate`].
pub trait ArrayListener {
    /// The array is about to forget its order. Sync lookups on `array` still
    /// answer in the old order.
    fn on_before_invalidate(&self, array: &dyn GuidArray) -> Result<(), ArrayError>;
}

/// Weakly held [`ArrayListener`]s of one array.
#[derive(Default)]
pub struct ArrayListeners {
    entries: RefCell<Vec<(ListenerId, Weak<dyn ArrayListener>)>>,
}

impl ArrayListeners {
    pub fn add(&self, listener: Weak<dyn ArrayListener>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.borrow_mut().push((id, listener));
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every live listener against `array`, pruning dropped ones.
    ///
    /// A failing listener is logged and does not stop the others.
    pub fn before_invalidate(&self, array: &dyn GuidArray) {
        let live: Vec<(ListenerId, Rc<dyn ArrayListener>)> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|(_, listener)| listener.strong_count() > 0);
            entries
                .iter()
                .filter_map(|(id, listener)| Some((*id, listener.upgrade()?)))
                .collect()
        };

        for (id, listener) in live {
            if let Err(err) = listener.on_before_invalidate(array) {
                warn!(?id, error = %err, "Before-invalidate listener failed");
            }
        }
    }
}

/// Batched property bag lookup shared with the array.
pub trait PropertyCache {
    /// Bags for `guids`, in the same order. Unknown guids yield `None`.
    fn properties(&self, guids: &[Guid]) -> Result<Vec<Option<Arc<PropertyBag>>>, ArrayError>;
}

/// The ordered GUID sequence a view pages over.
pub trait GuidArray {
    /// Current length. May be stale.
    fn length(&self) -> Result<u32, ArrayError>;

    /// Starts an async length query. Answered with [`ArrayEvent::Length`].
    fn request_length(&self) -> Result<(), ArrayError>;

    fn guid_by_index(&self, index: u32) -> Result<Guid, ArrayError>;

    /// Starts an async fetch of the page holding `index`. Answered with
    /// [`ArrayEvent::GuidByIndex`].
    fn request_guid_by_index(&self, index: u32) -> Result<(), ArrayError>;

    /// Database row id of the list entry at `index`. Distinguishes duplicate
    /// entries of the same item within one list.
    fn rowid_by_index(&self, index: u32) -> Result<i64, ArrayError>;

    /// Lower-cased value of the primary sort property at `index`.
    fn sort_value_by_index(&self, index: u32) -> Result<String, ArrayError>;

    /// First index whose lower-cased sort value starts with `prefix`.
    fn first_index_by_prefix(&self, prefix: &str) -> Result<u32, ArrayError>;

    /// Paging granularity. Never zero.
    fn fetch_size(&self) -> u32;

    /// Whether the array is a distinct-values projection of one property.
    fn is_distinct(&self) -> bool;

    /// Name of the table the array selects from.
    fn base_table(&self) -> String;

    fn clear_sorts(&self) -> Result<(), ArrayError>;

    fn add_sort(&self, property: &str, ascending: bool) -> Result<(), ArrayError>;

    /// Runs every [`ArrayListener`], then drops everything paged in; the next
    /// queries see fresh data.
    fn invalidate(&self) -> Result<(), ArrayError>;

    /// Registers a synchronous listener. Held weakly.
    fn add_listener(&self, listener: Weak<dyn ArrayListener>) -> ListenerId;

    /// Returns false when `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn add_async_listener(&self, sender: Sender<ArrayEvent>) -> ListenerId;

    /// Returns false when `id` was not registered.
    fn remove_async_listener(&self, id: ListenerId) -> bool;

    fn property_cache(&self) -> Rc<dyn PropertyCache>;
}
