/// Maps UI rows to backing array indices.
///
/// With a synthetic "all" row, row 0 has no array index and every other row
/// is shifted down by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagedIndex {
    synthetic_row: bool,
    row_count: u32,
}

impl PagedIndex {
    pub fn new(synthetic_row: bool) -> Self {
        Self {
            synthetic_row,
            row_count: 0,
        }
    }

    pub fn has_synthetic_row(&self) -> bool {
        self.synthetic_row
    }

    pub fn offset(&self) -> u32 {
        u32::from(self.synthetic_row)
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Array length implied by the current row count.
    pub fn length(&self) -> u32 {
        self.row_count.saturating_sub(self.offset())
    }

    /// Updates the row count from a fresh array length.
    pub fn set_length(&mut self, length: u32) {
        self.row_count = length.saturating_add(self.offset());
    }

    pub fn is_synthetic_row(&self, row: u32) -> bool {
        self.synthetic_row && row == 0
    }

    pub fn contains_row(&self, row: u32) -> bool {
        row < self.row_count
    }

    /// Array index shown on `row`, `None` for the synthetic row.
    pub fn to_array_index(&self, row: u32) -> Option<u32> {
        debug_assert!(
            self.row_count == 0 || row < self.row_count,
            "row {row} outside 0..{}",
            self.row_count
        );
        if self.is_synthetic_row(row) {
            return None;
        }
        Some(row - self.offset())
    }

    pub fn to_row(&self, index: u32) -> u32 {
        index + self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_rows_round_trip() {
        let mut index = PagedIndex::new(false);
        index.set_length(10);
        assert_eq!(index.row_count(), 10);
        for row in 0..10 {
            let array_index = index.to_array_index(row).unwrap();
            assert_eq!(index.to_row(array_index), row);
        }
        assert!(!index.is_synthetic_row(0));
    }

    #[test]
    fn test_synthetic_row_offsets_by_one() {
        let mut index = PagedIndex::new(true);
        index.set_length(10);
        assert_eq!(index.row_count(), 11);
        assert_eq!(index.length(), 10);
        assert!(index.is_synthetic_row(0));
        assert_eq!(index.to_array_index(0), None);
        for row in 1..11 {
            assert_eq!(index.to_array_index(row), Some(row - 1));
            assert_eq!(index.to_row(row - 1), row);
        }
    }

    #[test]
    fn test_empty_array_still_has_synthetic_row() {
        let mut index = PagedIndex::new(true);
        index.set_length(0);
        assert_eq!(index.row_count(), 1);
        assert!(index.contains_row(0));
        assert!(!index.contains_row(1));
    }
}
