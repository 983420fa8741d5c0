//! Type-ahead navigation.

use std::cmp::Ordering;

use tracing::{debug, trace, warn};

use super::{MediaTreeView, RowCountState};
use crate::error::{ViewError, ViewResult};

impl MediaTreeView {
    /// First row at or after `start_row` whose primary sort value starts with
    /// `text`, ignoring case.
    ///
    /// Returns `None` while the row count is unknown, since the answer would
    /// be against a moving target. Tries `start_row` first, then rows already
    /// cached, then asks the array and prefetches the page of its answer.
    ///
    /// The cache scan trusts a match only when the row before it is cached
    /// and sorts before `text`; a sparse cache can still mislead it.
    pub fn find_row_by_prefix(&self, text: &str, start_row: u32) -> ViewResult<Option<u32>> {
        if text.is_empty() {
            return Err(ViewError::InvalidArgument("empty search text".into()));
        }
        if self.row_count_state.get() != RowCountState::Clean {
            debug!("Row count unknown, not searching");
            return Ok(None);
        }

        let paged = self.index.get();
        let length = paged.length();
        let start = start_row.saturating_sub(paged.offset());
        if start >= length {
            return Ok(None);
        }

        let key = text.to_lowercase();
        let key_len = key.chars().count();
        let head = |value: String| -> String { value.chars().take(key_len).collect() };

        // Consecutive keystrokes usually still match the current row.
        if head(self.array.sort_value_by_index(start)?) == key {
            return Ok(Some(paged.to_row(start)));
        }

        let cached = self.cache.borrow().fresh_indices_from(start + 1);
        let mut last_miss: Option<u32> = None;
        for index in cached.into_iter().take_while(|index| *index < length) {
            match key.cmp(&head(self.array.sort_value_by_index(index)?)) {
                Ordering::Greater => last_miss = Some(index),
                Ordering::Equal if last_miss == Some(index - 1) => {
                    trace!(index, "Prefix found in cache");
                    return Ok(Some(paged.to_row(index)));
                }
                Ordering::Equal | Ordering::Less => break,
            }
        }

        let found = match self.array.first_index_by_prefix(&key) {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, "No row for prefix");
                return Ok(None);
            }
        };
        if found < start {
            return Ok(None);
        }

        // The caller is about to show this row.
        if let Err(err) = self.request_page(found) {
            warn!(index = found, error = %err, "Prefetch for prefix match failed");
        }
        Ok(Some(paged.to_row(found)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeArray, FakeTree, Harness};
    use crate::tree::TreeColumn;

    const BANDS: [&str; 5] = ["abba", "beatles", "cream", "doors", "eagles"];

    fn harness(array: FakeArray) -> Harness {
        Harness::new(array, FakeTree::with_columns(&["title"]))
    }

    #[test]
    fn test_current_row_still_matching() {
        let h = harness(FakeArray::with_titles(&["Zeppelin", "Zombies"], 10));
        assert_eq!(h.view.find_row_by_prefix("Zep", 0).unwrap(), Some(0));
        assert!(h.array.issued_fetches().is_empty());
        assert_eq!(h.array.prefix_queries(), 0);
    }

    #[test]
    fn test_array_search_prefetches_match() {
        let h = harness(FakeArray::with_titles(&BANDS, 2));
        assert_eq!(h.view.find_row_by_prefix("do", 0).unwrap(), Some(3));
        assert_eq!(h.array.prefix_queries(), 1);
        assert_eq!(h.array.issued_fetches(), vec![3]);
    }

    #[test]
    fn test_no_match_at_or_after_start() {
        let h = harness(FakeArray::with_titles(&BANDS, 2));
        assert_eq!(h.view.find_row_by_prefix("ab", 2).unwrap(), None);
        assert_eq!(h.view.find_row_by_prefix("zz", 0).unwrap(), None);
        assert_eq!(h.view.find_row_by_prefix("a", 9).unwrap(), None);
        assert!(h.array.issued_fetches().is_empty());
    }

    #[test]
    fn test_unknown_row_count_finds_nothing() {
        let h = harness(FakeArray::with_titles(&BANDS, 2));
        h.view.rebuild().unwrap();
        assert_eq!(h.view.find_row_by_prefix("do", 0).unwrap(), None);
        assert_eq!(h.array.prefix_queries(), 0);
    }

    #[test]
    fn test_empty_text_rejected() {
        let h = harness(FakeArray::with_titles(&BANDS, 2));
        assert!(matches!(
            h.view.find_row_by_prefix("", 0),
            Err(ViewError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cached_rows_searched_first() {
        let h = harness(FakeArray::library(100, 10));
        h.view.cell_text(0, &TreeColumn::new(0, "title")).unwrap();
        h.settle();

        assert_eq!(h.view.find_row_by_prefix("Title 0005", 0).unwrap(), Some(5));
        assert_eq!(h.array.prefix_queries(), 0);

        // Past the last cached row the array decides.
        assert_eq!(h.view.find_row_by_prefix("title 0015", 0).unwrap(), Some(15));
        assert_eq!(h.array.prefix_queries(), 1);
        assert_eq!(h.array.issued_fetches(), vec![0, 15]);
    }

    #[test]
    fn test_scan_visits_only_cached_rows_after_start() {
        let h = harness(FakeArray::library(1000, 10));
        let title = TreeColumn::new(0, "title");
        h.view.cell_text(0, &title).unwrap();
        h.settle();
        h.view.cell_text(500, &title).unwrap();
        h.settle();

        // Everything cached sits below the start row.
        let reads = h.array.sort_value_reads();
        assert_eq!(h.view.find_row_by_prefix("title 0900", 600).unwrap(), Some(900));
        assert_eq!(h.array.sort_value_reads(), reads + 1);
        assert_eq!(h.array.prefix_queries(), 1);

        // A cached page far past the start is still found without asking.
        let reads = h.array.sort_value_reads();
        assert_eq!(h.view.find_row_by_prefix("title 0505", 100).unwrap(), Some(505));
        assert_eq!(h.array.sort_value_reads(), reads + 7);
        assert_eq!(h.array.prefix_queries(), 1);
    }

    #[test]
    fn test_synthetic_row_searches_from_first_value() {
        let h = harness(FakeArray::with_titles(&BANDS, 2).distinct());
        assert_eq!(h.view.find_row_by_prefix("a", 0).unwrap(), Some(1));
        assert_eq!(h.view.find_row_by_prefix("b", 0).unwrap(), Some(2));
    }
}
