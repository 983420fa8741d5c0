//! Reference [`GuidArray`] over a [`MediaStore`].
//!
//! - Sorted by any property, with the entry rowid as final tiebreak
//! - Optional distinct projection onto one property
//! - Pages of `fetch_size` rows are snapshotted on first access and kept until
//!   [`GuidArray::invalidate`]; sort changes take effect from the next invalidate
//! - Async requests are queued and answered by [`SqliteGuidArray::process_pending`],
//!   which the host calls on a later turn of its event loop

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use flume::Sender;
use lru::LruCache;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, OptionalExtension};
use tracing::{debug, trace};

use crate::array::{
    ArrayEvent, ArrayListener, ArrayListeners, ArrayState, GuidArray, ListenerId, PropertyCache,
};
use crate::config::StoreConfig;
use crate::error::ArrayError;
use crate::models::{
    Guid, MediaStore, PropertyBag, SortDescriptor, CREATED_PROPERTY, LIBRARY_TABLE,
    SIMPLE_LIST_TABLE,
};

/// Property id of a list entry's position.
pub const ORDINAL_PROPERTY: &str = "ordinal";

fn storage(err: anyhow::Error) -> ArrayError {
    ArrayError::Storage(format!("{err:#}"))
}

/// What the array enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySource {
    /// Every library item.
    Library,
    /// Entries of one simple list, in list order by default.
    List(Guid),
}

#[derive(Debug, Clone)]
struct ArrayRow {
    rowid: i64,
    guid: Guid,
    sort_value: String,
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Length,
    GuidByIndex(u32),
}

/// SQL fragments for the current source and sort.
struct Query {
    columns: String,
    body: String,
    order: String,
    params: Vec<String>,
}

impl Query {
    fn select(&self) -> String {
        format!("SELECT {} FROM {}", self.columns, self.body)
    }
}

/// Sorted, paged GUID sequence backed by SQLite.
pub struct SqliteGuidArray {
    store: Rc<MediaStore>,
    source: ArraySource,
    distinct_property: Option<String>,
    fetch_size: u32,
    sorts: RefCell<Vec<SortDescriptor>>,
    active_sorts: RefCell<Vec<SortDescriptor>>,
    length: Cell<Option<u32>>,
    pages: RefCell<HashMap<u32, Rc<Vec<ArrayRow>>>>,
    pending: RefCell<VecDeque<Request>>,
    listeners: RefCell<Vec<(ListenerId, Sender<ArrayEvent>)>>,
    invalidate_listeners: ArrayListeners,
    property_cache: Rc<StorePropertyCache>,
}

impl SqliteGuidArray {
    pub fn new(store: Rc<MediaStore>, source: ArraySource, config: &StoreConfig) -> Self {
        let property_cache = Rc::new(StorePropertyCache::new(
            store.clone(),
            config.property_cache_entries,
        ));
        Self {
            store,
            source,
            distinct_property: None,
            fetch_size: config.fetch_size.max(1),
            sorts: RefCell::new(Vec::new()),
            active_sorts: RefCell::new(Vec::new()),
            length: Cell::new(None),
            pages: RefCell::new(HashMap::new()),
            pending: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(Vec::new()),
            invalidate_listeners: ArrayListeners::default(),
            property_cache,
        }
    }

    /// Turns the array into a distinct-values projection of `property`.
    pub fn distinct(mut self, property: impl Into<String>) -> Self {
        self.distinct_property = Some(property.into());
        self
    }

    /// Sets the initial sort, effective immediately.
    pub fn sorted_by(mut self, sort: SortDescriptor) -> Self {
        *self.sorts.get_mut() = vec![sort];
        *self.active_sorts.get_mut() = self.sorts.get_mut().clone();
        self
    }

    pub fn store_property_cache(&self) -> Rc<StorePropertyCache> {
        self.property_cache.clone()
    }

    /// Number of queued async requests.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Answers every queued async request, broadcasting the results.
    ///
    /// Returns the number of requests answered.
    pub fn process_pending(&self) -> usize {
        let requests: Vec<Request> = self.pending.borrow_mut().drain(..).collect();
        if requests.is_empty() {
            return 0;
        }

        self.broadcast(ArrayEvent::StateChange(ArrayState::Busy));
        for request in &requests {
            let event = match *request {
                Request::Length => ArrayEvent::Length(self.length()),
                Request::GuidByIndex(index) => ArrayEvent::GuidByIndex {
                    index,
                    result: self.guid_by_index(index),
                },
            };
            self.broadcast(event);
        }
        self.broadcast(ArrayEvent::StateChange(ArrayState::Idle));

        debug!(count = requests.len(), "Answered array requests");
        requests.len()
    }

    fn broadcast(&self, event: ArrayEvent) {
        self.listeners.borrow_mut().retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!(?id, "Dropping disconnected array listener");
            }
            alive
        });
    }

    fn query(&self) -> Query {
        let (from, rowid, ordinal) = match &self.source {
            ArraySource::Library => ("media_items i", "i.rowid", "i.rowid"),
            ArraySource::List(_) => (
                "simple_media_lists e JOIN media_items i ON i.guid = e.item_guid",
                "e.rowid",
                "e.ordinal",
            ),
        };

        // A distinct projection always sorts on its own property.
        let sorts = match &self.distinct_property {
            Some(property) => {
                let ascending = self
                    .active_sorts
                    .borrow()
                    .first()
                    .map_or(true, |sort| sort.ascending);
                vec![SortDescriptor::new(property.clone(), ascending)]
            }
            None => self.active_sorts.borrow().clone(),
        };

        let mut joins = String::new();
        let mut params = Vec::new();
        let mut order = Vec::new();
        let mut value = "''".to_string();

        for (slot, sort) in sorts.iter().enumerate() {
            let (key, display) = match sort.property.as_str() {
                CREATED_PROPERTY => ("i.created".to_string(), "CAST(i.created AS TEXT)".to_string()),
                ORDINAL_PROPERTY => (ordinal.to_string(), format!("CAST({ordinal} AS TEXT)")),
                property => {
                    joins.push_str(&format!(
                        " LEFT JOIN media_item_properties p{slot} \
                         ON p{slot}.guid = i.guid AND p{slot}.property_id = ?"
                    ));
                    params.push(property.to_string());
                    let expr = format!("lower(COALESCE(p{slot}.value, ''))");
                    (expr.clone(), expr)
                }
            };
            if slot == 0 {
                value = display;
            }
            let direction = if sort.ascending { "ASC" } else { "DESC" };
            order.push(format!("{key} {direction}"));
        }

        let filter = match &self.source {
            ArraySource::Library => String::new(),
            ArraySource::List(list_guid) => {
                params.push(list_guid.clone());
                " WHERE e.list_guid = ?".to_string()
            }
        };

        let (columns, body) = if self.distinct_property.is_some() {
            (
                format!("MIN({rowid}), i.guid, {value} AS v"),
                format!("{from}{joins}{filter} GROUP BY {value}"),
            )
        } else {
            order.push(format!("{rowid} ASC"));
            (
                format!("{rowid}, i.guid, {value} AS v"),
                format!("{from}{joins}{filter}"),
            )
        };

        Query {
            columns,
            body,
            order: order.join(", "),
            params,
        }
    }

    fn load_page(&self, page: u32) -> Result<Rc<Vec<ArrayRow>>, ArrayError> {
        if let Some(rows) = self.pages.borrow().get(&page) {
            return Ok(rows.clone());
        }

        let query = self.query();
        let sql = format!(
            "{} ORDER BY {} LIMIT {} OFFSET {}",
            query.select(),
            query.order,
            self.fetch_size,
            u64::from(page) * u64::from(self.fetch_size)
        );
        let rows = self
            .store
            .with_conn(|conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(query.params.iter()), |row| {
                        Ok(ArrayRow {
                            rowid: row.get(0)?,
                            guid: row.get(1)?,
                            sort_value: row.get(2)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .map_err(storage)?;

        trace!(page, rows = rows.len(), "Loaded array page");
        let rows = Rc::new(rows);
        self.pages.borrow_mut().insert(page, rows.clone());
        Ok(rows)
    }

    fn row(&self, index: u32) -> Result<ArrayRow, ArrayError> {
        let length = self.length()?;
        let out_of_range = ArrayError::IndexOutOfRange { index, length };
        if index >= length {
            return Err(out_of_range);
        }
        let page = self.load_page(index / self.fetch_size)?;
        page.get((index % self.fetch_size) as usize)
            .cloned()
            .ok_or(out_of_range)
    }
}

impl GuidArray for SqliteGuidArray {
    fn length(&self) -> Result<u32, ArrayError> {
        if let Some(length) = self.length.get() {
            return Ok(length);
        }

        let query = self.query();
        let sql = format!("SELECT COUNT(*) FROM ({})", query.select());
        let count: i64 = self
            .store
            .with_conn(|conn| {
                Ok(conn.query_row(&sql, params_from_iter(query.params.iter()), |r| r.get(0))?)
            })
            .map_err(storage)?;

        let length = count as u32;
        self.length.set(Some(length));
        Ok(length)
    }

    fn request_length(&self) -> Result<(), ArrayError> {
        self.pending.borrow_mut().push_back(Request::Length);
        Ok(())
    }

    fn guid_by_index(&self, index: u32) -> Result<Guid, ArrayError> {
        self.row(index).map(|row| row.guid)
    }

    fn request_guid_by_index(&self, index: u32) -> Result<(), ArrayError> {
        self.pending
            .borrow_mut()
            .push_back(Request::GuidByIndex(index));
        Ok(())
    }

    fn rowid_by_index(&self, index: u32) -> Result<i64, ArrayError> {
        self.row(index).map(|row| row.rowid)
    }

    fn sort_value_by_index(&self, index: u32) -> Result<String, ArrayError> {
        self.row(index).map(|row| row.sort_value)
    }

    fn first_index_by_prefix(&self, prefix: &str) -> Result<u32, ArrayError> {
        let prefix = prefix.to_lowercase();
        let mut query = self.query();
        let sql = format!(
            "SELECT idx FROM (SELECT {columns}, ROW_NUMBER() OVER (ORDER BY {order}) - 1 AS idx FROM {body}) \
             WHERE substr(v, 1, {len}) = ? ORDER BY idx LIMIT 1",
            columns = query.columns,
            order = query.order,
            body = query.body,
            len = prefix.chars().count(),
        );
        query.params.push(prefix.clone());

        let found: Option<i64> = self
            .store
            .with_conn(|conn| {
                Ok(conn
                    .query_row(&sql, params_from_iter(query.params.iter()), |r| r.get(0))
                    .optional()?)
            })
            .map_err(storage)?;

        found
            .map(|idx| idx as u32)
            .ok_or(ArrayError::NotFound(prefix))
    }

    fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    fn is_distinct(&self) -> bool {
        self.distinct_property.is_some()
    }

    fn base_table(&self) -> String {
        match self.source {
            ArraySource::Library => LIBRARY_TABLE.to_string(),
            ArraySource::List(_) => SIMPLE_LIST_TABLE.to_string(),
        }
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

    fn invalidate(&self) -> Result<(), ArrayError> {
        self.invalidate_listeners.before_invalidate(self);
        *self.active_sorts.borrow_mut() = self.sorts.borrow().clone();
        self.pages.borrow_mut().clear();
        self.length.set(None);
        self.property_cache.clear();
        debug!(source = ?self.source, "Array invalidated");
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
        self.property_cache.clone()
    }
}

// =========================================================================
// Property Cache
// =========================================================================

/// LRU of property bags loaded from the store.
pub struct StorePropertyCache {
    store: Rc<MediaStore>,
    entries: Mutex<LruCache<Guid, Arc<PropertyBag>>>,
}

impl StorePropertyCache {
    pub fn new(store: Rc<MediaStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Forgets one item, e.g. after a property write.
    pub fn remove(&self, guid: &str) {
        self.entries.lock().pop(guid);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropertyCache for StorePropertyCache {
    fn properties(&self, guids: &[Guid]) -> Result<Vec<Option<Arc<PropertyBag>>>, ArrayError> {
        let mut bags: Vec<Option<Arc<PropertyBag>>> = vec![None; guids.len()];
        let mut misses = Vec::new();
        let mut miss_slots = Vec::new();

        {
            let mut entries = self.entries.lock();
            for (slot, guid) in guids.iter().enumerate() {
                match entries.get(guid) {
                    Some(bag) => bags[slot] = Some(bag.clone()),
                    None => {
                        misses.push(guid.clone());
                        miss_slots.push(slot);
                    }
                }
            }
        }

        if misses.is_empty() {
            return Ok(bags);
        }

        let loaded = self.store.item_properties(&misses).map_err(storage)?;
        let mut entries = self.entries.lock();
        for (slot, bag) in miss_slots.into_iter().zip(loaded) {
            if let Some(bag) = bag {
                let bag = Arc::new(bag);
                entries.put(bag.guid().to_string(), bag.clone());
                bags[slot] = Some(bag);
            }
        }

        trace!(
            requested = guids.len(),
            loaded = misses.len(),
            "Property cache fill"
        );
        Ok(bags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(titles: &[(&str, &str, &str)]) -> Rc<MediaStore> {
        let store = MediaStore::open_in_memory().unwrap();
        for (n, (guid, title, artist)) in titles.iter().enumerate() {
            let bag = PropertyBag::new(*guid)
                .with("title", *title)
                .with("artist", *artist);
            store.add_item(&bag, n as i64).unwrap();
        }
        Rc::new(store)
    }

    fn small_pages() -> StoreConfig {
        StoreConfig {
            fetch_size: 2,
            property_cache_entries: 16,
        }
    }

    #[test]
    fn test_sorted_library() {
        let store = library(&[
            ("g1", "Kashmir", "Led Zeppelin"),
            ("g2", "animal", "Pearl Jam"),
            ("g3", "Black Dog", "Led Zeppelin"),
        ]);
        let array = SqliteGuidArray::new(store, ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));

        assert_eq!(array.length().unwrap(), 3);
        assert_eq!(array.guid_by_index(0).unwrap(), "g2");
        assert_eq!(array.guid_by_index(1).unwrap(), "g3");
        assert_eq!(array.guid_by_index(2).unwrap(), "g1");
        assert_eq!(array.sort_value_by_index(1).unwrap(), "black dog");
        assert!(matches!(
            array.guid_by_index(3),
            Err(ArrayError::IndexOutOfRange { index: 3, length: 3 })
        ));
    }

    #[test]
    fn test_sort_change_applies_on_invalidate() {
        let store = library(&[("g1", "a", "x"), ("g2", "b", "y")]);
        let array = SqliteGuidArray::new(store, ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));
        assert_eq!(array.guid_by_index(0).unwrap(), "g1");

        array.clear_sorts().unwrap();
        array.add_sort("title", false).unwrap();
        assert_eq!(array.guid_by_index(0).unwrap(), "g1");

        array.invalidate().unwrap();
        assert_eq!(array.guid_by_index(0).unwrap(), "g2");
    }

    #[test]
    fn test_list_duplicates_keep_distinct_rowids() {
        let store = library(&[("g1", "a", "x"), ("g2", "b", "y")]);
        store.add_list_entry("l", "g1").unwrap();
        store.add_list_entry("l", "g2").unwrap();
        store.add_list_entry("l", "g1").unwrap();

        let array = SqliteGuidArray::new(store, ArraySource::List("l".into()), &small_pages())
            .sorted_by(SortDescriptor::ascending(ORDINAL_PROPERTY));
        assert_eq!(array.length().unwrap(), 3);
        assert_eq!(array.base_table(), SIMPLE_LIST_TABLE);
        assert_eq!(array.guid_by_index(0).unwrap(), "g1");
        assert_eq!(array.guid_by_index(2).unwrap(), "g1");
        assert_ne!(
            array.rowid_by_index(0).unwrap(),
            array.rowid_by_index(2).unwrap()
        );
    }

    #[test]
    fn test_distinct_projection() {
        let store = library(&[
            ("g1", "a", "Led Zeppelin"),
            ("g2", "b", "Pearl Jam"),
            ("g3", "c", "led zeppelin"),
        ]);
        let array =
            SqliteGuidArray::new(store, ArraySource::Library, &small_pages()).distinct("artist");

        assert!(array.is_distinct());
        assert_eq!(array.length().unwrap(), 2);
        assert_eq!(array.sort_value_by_index(0).unwrap(), "led zeppelin");
        assert_eq!(array.sort_value_by_index(1).unwrap(), "pearl jam");
    }

    #[test]
    fn test_first_index_by_prefix() {
        let store = library(&[
            ("g1", "Kashmir", "x"),
            ("g2", "Zephyr", "x"),
            ("g3", "Zeppelin Song", "x"),
            ("g4", "Alpha", "x"),
        ]);
        let array = SqliteGuidArray::new(store, ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));

        assert_eq!(array.first_index_by_prefix("ZEP").unwrap(), 2);
        assert_eq!(array.first_index_by_prefix("k").unwrap(), 1);
        assert!(matches!(
            array.first_index_by_prefix("q"),
            Err(ArrayError::NotFound(_))
        ));
    }

    #[test]
    fn test_requests_answered_on_later_turn() {
        let store = library(&[("g1", "a", "x"), ("g2", "b", "y"), ("g3", "c", "z")]);
        let array = SqliteGuidArray::new(store, ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));
        let (tx, rx) = flume::unbounded();
        let id = array.add_async_listener(tx);

        array.request_length().unwrap();
        array.request_guid_by_index(2).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(array.pending_count(), 2);

        assert_eq!(array.process_pending(), 2);
        let events: Vec<ArrayEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ArrayEvent::StateChange(ArrayState::Busy),
                ArrayEvent::Length(Ok(3)),
                ArrayEvent::GuidByIndex {
                    index: 2,
                    result: Ok("g3".to_string())
                },
                ArrayEvent::StateChange(ArrayState::Idle),
            ]
        );

        assert!(array.remove_async_listener(id));
        assert!(!array.remove_async_listener(id));
    }

    #[test]
    fn test_removed_item_is_stale_after_invalidate() {
        let store = library(&[("g1", "a", "x"), ("g2", "b", "y")]);
        let array = SqliteGuidArray::new(store.clone(), ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));
        assert_eq!(array.guid_by_index(1).unwrap(), "g2");

        store.remove_item("g2").unwrap();
        assert_eq!(array.guid_by_index(1).unwrap(), "g2");

        array.invalidate().unwrap();
        assert!(matches!(
            array.guid_by_index(1),
            Err(ArrayError::IndexOutOfRange { .. })
        ));
    }

    struct OrderRecorder {
        before: RefCell<Vec<Guid>>,
    }

    impl ArrayListener for OrderRecorder {
        fn on_before_invalidate(&self, array: &dyn GuidArray) -> Result<(), ArrayError> {
            let length = array.length()?;
            let guids = (0..length)
                .map(|index| array.guid_by_index(index))
                .collect::<Result<Vec<_>, _>>()?;
            self.before.replace(guids);
            Ok(())
        }
    }

    #[test]
    fn test_listeners_see_old_order_before_invalidate() {
        let store = library(&[("g1", "a", "x"), ("g2", "b", "y"), ("g3", "c", "z")]);
        let array = SqliteGuidArray::new(store, ArraySource::Library, &small_pages())
            .sorted_by(SortDescriptor::ascending("title"));
        let listener = Rc::new(OrderRecorder {
            before: RefCell::new(Vec::new()),
        });
        let dyn_listener: Rc<dyn ArrayListener> = listener.clone();
        let id = array.add_listener(Rc::downgrade(&dyn_listener));

        array.clear_sorts().unwrap();
        array.add_sort("title", false).unwrap();
        array.invalidate().unwrap();
        assert_eq!(*listener.before.borrow(), vec!["g1", "g2", "g3"]);
        assert_eq!(array.guid_by_index(0).unwrap(), "g3");

        assert!(array.remove_listener(id));
        listener.before.replace(Vec::new());
        array.invalidate().unwrap();
        assert!(listener.before.borrow().is_empty());
    }

    #[test]
    fn test_property_cache() {
        let store = library(&[("g1", "Kashmir", "Led Zeppelin")]);
        let array = SqliteGuidArray::new(store.clone(), ArraySource::Library, &small_pages());
        let cache = array.property_cache();

        let bags = cache
            .properties(&["g1".to_string(), "nope".to_string()])
            .unwrap();
        assert_eq!(bags[0].as_ref().unwrap().value("title"), "Kashmir");
        assert!(bags[1].is_none());
        assert_eq!(array.store_property_cache().len(), 1);

        store.set_item_property("g1", "title", "Rock").unwrap();
        let cached = cache.properties(&["g1".to_string()]).unwrap();
        assert_eq!(cached[0].as_ref().unwrap().value("title"), "Kashmir");

        array.store_property_cache().remove("g1");
        let fresh = cache.properties(&["g1".to_string()]).unwrap();
        assert_eq!(fresh[0].as_ref().unwrap().value("title"), "Rock");
    }
}
