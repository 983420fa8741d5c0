use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use tracing::trace;

use super::TreeSelection;

/// In-memory [`TreeSelection`] for hosts without a native one.
///
/// Counts the selection-changed notifications it would have fired.
#[derive(Debug, Default)]
pub struct RangeSelection {
    rows: RefCell<BTreeSet<u32>>,
    current: Cell<Option<u32>>,
    suppressed: Cell<bool>,
    events: Cell<u32>,
}

impl RangeSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications fired so far.
    pub fn select_events(&self) -> u32 {
        self.events.get()
    }

    pub fn current_index(&self) -> Option<u32> {
        self.current.get()
    }

    pub fn count(&self) -> usize {
        self.rows.borrow().len()
    }

    fn changed(&self) {
        if !self.suppressed.get() {
            self.events.set(self.events.get() + 1);
            trace!(rows = self.rows.borrow().len(), "Selection changed");
        }
    }
}

impl TreeSelection for RangeSelection {
    fn select(&self, row: u32) {
        {
            let mut rows = self.rows.borrow_mut();
            rows.clear();
            rows.insert(row);
        }
        self.current.set(Some(row));
        self.changed();
    }

    fn ranged_select(&self, first: u32, last: u32, augment: bool) {
        let (first, last) = if first <= last { (first, last) } else { (last, first) };
        {
            let mut rows = self.rows.borrow_mut();
            if !augment {
                rows.clear();
            }
            rows.extend(first..=last);
        }
        self.changed();
    }

    fn clear_selection(&self) {
        self.rows.borrow_mut().clear();
        self.changed();
    }

    fn toggle_select(&self, row: u32) {
        {
            let mut rows = self.rows.borrow_mut();
            if !rows.remove(&row) {
                rows.insert(row);
            }
        }
        self.current.set(Some(row));
        self.changed();
    }

    fn is_selected(&self, row: u32) -> bool {
        self.rows.borrow().contains(&row)
    }

    fn ranges(&self) -> Vec<(u32, u32)> {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for &row in self.rows.borrow().iter() {
            match ranges.last_mut() {
                Some((_, last)) if last.checked_add(1) == Some(row) => *last = row,
                _ => ranges.push((row, row)),
            }
        }
        ranges
    }

    fn set_select_events_suppressed(&self, suppressed: bool) {
        self.suppressed.set(suppressed);
    }

    fn select_events_suppressed(&self) -> bool {
        self.suppressed.get()
    }

    fn set_current_index(&self, row: Option<u32>) {
        self.current.set(row);
    }
}
