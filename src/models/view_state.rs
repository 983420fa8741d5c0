use std::collections::BTreeMap;
use std::fmt;

use super::Guid;

/// Stable identifier -> backing GUID for explicitly selected rows.
pub type SelectionEntries = BTreeMap<String, Guid>;

/// Primary sort key of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub property: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn new(property: impl Into<String>, ascending: bool) -> Self {
        Self {
            property: property.into(),
            ascending,
        }
    }

    pub fn ascending(property: impl Into<String>) -> Self {
        Self::new(property, true)
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self::new(property, false)
    }
}

/// How the selection is recorded in a persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    All,
    Explicit,
}

/// A view's selection, independent of transient row numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    /// Everything is selected; no explicit enumeration exists.
    AllSelected,
    /// Only the listed identifiers are selected.
    Explicit(SelectionEntries),
}

impl SelectionState {
    pub fn mode(&self) -> SelectionMode {
        match self {
            SelectionState::AllSelected => SelectionMode::All,
            SelectionState::Explicit(_) => SelectionMode::Explicit,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, SelectionState::AllSelected)
    }

    /// Explicit entries; empty for [`SelectionState::AllSelected`].
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        let entries = match self {
            SelectionState::AllSelected => None,
            SelectionState::Explicit(entries) => Some(entries),
        };
        entries
            .into_iter()
            .flat_map(|e| e.iter().map(|(id, guid)| (id.as_str(), guid.as_str())))
    }

    pub fn len(&self) -> usize {
        match self {
            SelectionState::AllSelected => 0,
            SelectionState::Explicit(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        SelectionState::Explicit(SelectionEntries::new())
    }
}

/// Persistable snapshot of a view: sort plus selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub sort: SortDescriptor,
    pub selection: SelectionState,
}

impl ViewState {
    pub fn new(sort: SortDescriptor, selection: SelectionState) -> Self {
        Self { sort, selection }
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.sort.ascending { "asc" } else { "desc" };
        write!(f, "{} {} selection ", self.sort.property, direction)?;
        match &self.selection {
            SelectionState::AllSelected => write!(f, "is all"),
            SelectionState::Explicit(entries) => write!(f, "{} items", entries.len()),
        }
    }
}
