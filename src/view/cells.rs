//! Per-row and per-cell grid queries.
//!
//! Every query answers immediately. A miss on the page cache starts a page
//! fetch and falls back to whatever the dirty tier still holds.

use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::{MediaTreeView, PageStatus};
use crate::error::{ViewError, ViewResult};
use crate::models::{ProgressMode, PropertyInfo};
use crate::tree::{DropOrientation, MouseState, TreeColumn};

/// Characters replaced by a hyphen in column tokens.
const BAD_CSS_CHARS: &str = "/.:# !@$%^&*(),?;'\"<>~=+`\\|[]{}";

/// The cell last touched by the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MouseTarget {
    pub row: u32,
    pub column: TreeColumn,
    pub state: MouseState,
}

/// Space separated tokens, first occurrence wins.
#[derive(Debug, Default)]
struct Tokens(Vec<String>);

impl Tokens {
    fn add(&mut self, tokens: &str) {
        for token in tokens.split_whitespace() {
            if !self.0.iter().any(|existing| existing == token) {
                self.0.push(token.to_string());
            }
        }
    }

    fn into_string(self) -> String {
        self.0.join(" ")
    }
}

/// CSS-safe token for a property id. Runs of unsafe characters become one hyphen.
pub fn column_token(property: &str) -> String {
    let mut token = String::with_capacity(property.len());
    for ch in property.chars() {
        if !BAD_CSS_CHARS.contains(ch) {
            token.push(ch);
        } else if !token.ends_with('-') {
            token.push('-');
        }
    }
    token
}

impl MediaTreeView {
    fn column_info(&self, column: &TreeColumn) -> ViewResult<Rc<dyn PropertyInfo>> {
        self.properties.property_info(&column.property)
    }

    /// Raw value of `property` at `index` from either cache tier.
    fn cached_value(&self, index: u32, property: &str) -> Option<String> {
        self.cache
            .borrow()
            .get(index)
            .map(|bag| bag.value(property).to_string())
    }

    /// Property info and raw value behind a cell. `None` for the synthetic
    /// row and for rows cached in neither tier.
    fn cached_cell(
        &self,
        row: u32,
        column: &TreeColumn,
    ) -> ViewResult<Option<(Rc<dyn PropertyInfo>, String)>> {
        let Some(index) = self.index.get().to_array_index(row) else {
            return Ok(None);
        };
        let Some(value) = self.cached_value(index, &column.property) else {
            return Ok(None);
        };
        Ok(Some((self.column_info(column)?, value)))
    }

    /// Display text of a cell.
    ///
    /// On a miss this starts fetching the row's page and returns the stale
    /// value kept from before the last rebuild, or an empty string.
    pub fn cell_text(&self, row: u32, column: &TreeColumn) -> ViewResult<String> {
        let Some(index) = self.index.get().to_array_index(row) else {
            return Ok(self.config.all_label.clone());
        };

        if column.property == self.config.ordinal_property {
            return Ok((u64::from(index) + 1).to_string());
        }

        let info = self.column_info(column)?;
        let fresh = self
            .cache
            .borrow()
            .get_fresh(index)
            .map(|bag| bag.value(&column.property).to_string());
        if let Some(value) = fresh {
            return Ok(info.format(&value).unwrap_or_default());
        }

        if self.cache.borrow().page_status(index) == PageStatus::Cached {
            warn!(index, "Page cached but row missing");
        }
        self.request_page(index)?;

        let stale = self
            .cache
            .borrow()
            .get(index)
            .map(|bag| bag.value(&column.property).to_string())
            .unwrap_or_default();
        if stale.is_empty() {
            return Ok(stale);
        }
        Ok(info.format(&stale).unwrap_or_default())
    }

    pub fn cell_value(&self, row: u32, column: &TreeColumn) -> ViewResult<String> {
        let value = self.cached_cell(row, column)?.and_then(|(info, value)| {
            info.tree_view().map(|tree_view| tree_view.cell_value(&value))
        });
        Ok(value.unwrap_or_default())
    }

    pub fn image_src(&self, row: u32, column: &TreeColumn) -> ViewResult<String> {
        let src = self.cached_cell(row, column)?.and_then(|(info, value)| {
            info.tree_view().map(|tree_view| tree_view.image_src(&value))
        });
        Ok(src.unwrap_or_default())
    }

    pub fn progress_mode(&self, row: u32, column: &TreeColumn) -> ViewResult<ProgressMode> {
        let mode = self.cached_cell(row, column)?.and_then(|(info, value)| {
            info.tree_view().map(|tree_view| tree_view.progress_mode(&value))
        });
        Ok(mode.unwrap_or_default())
    }

    // =====================================================================
    // Decorations
    // =====================================================================

    /// Row tokens: `all` on the synthetic row, otherwise `playing` and the
    /// row tokens every known property derives from the cached values.
    ///
    /// Lists that delegate selection also sync the grid's selection of `row`
    /// with the host's here.
    pub fn row_properties(&self, row: u32) -> ViewResult<String> {
        self.sync_row_selection(row);

        let Some(index) = self.index.get().to_array_index(row) else {
            return Ok("all".to_string());
        };

        let mut tokens = Tokens::default();
        if self.is_playing(index)? {
            tokens.add("playing");
        }

        let bag = self.cache.borrow().get(index).cloned();
        let Some(bag) = bag else {
            return Ok(tokens.into_string());
        };
        for id in self.properties.property_ids() {
            let info = self.properties.property_info(&id)?;
            if let Some(tree_view) = info.tree_view() {
                tokens.add(&tree_view.row_properties(bag.value(&id)));
            }
        }
        Ok(tokens.into_string())
    }

    /// Cell tokens: column token, pointer state, `playing`, the property's
    /// cell tokens and `disabled`. Empty on the synthetic row.
    pub fn cell_properties(&self, row: u32, column: &TreeColumn) -> ViewResult<String> {
        let Some(index) = self.index.get().to_array_index(row) else {
            return Ok(String::new());
        };

        let mut tokens = Tokens::default();
        tokens.add(&column_token(&column.property));

        let mouse = self.mouse.borrow().clone();
        if let Some(target) = mouse.filter(|t| t.row == row && t.column == *column) {
            match target.state {
                MouseState::Hover => tokens.add("cell-hover"),
                MouseState::Active => tokens.add("cell-active"),
                MouseState::None => {}
            }
        }

        if self.is_playing(index)? {
            tokens.add("playing");
        }

        if let Some((info, value)) = self.cached_cell(row, column)? {
            if let Some(tree_view) = info.tree_view() {
                tokens.add(&tree_view.cell_properties(&value));
            }
            if info.clickable().is_some_and(|c| c.is_disabled(&value)) {
                tokens.add("disabled");
            }
        }
        Ok(tokens.into_string())
    }

    pub fn column_properties(&self, column: &TreeColumn) -> String {
        column_token(&column.property)
    }

    /// Records the cell under the pointer and repaints the old and new cells.
    pub fn set_mouse_state(&self, row: Option<u32>, column: Option<&TreeColumn>, state: MouseState) {
        let target = match (row, column) {
            (Some(row), Some(column)) => Some(MouseTarget {
                row,
                column: column.clone(),
                state,
            }),
            _ => None,
        };
        let previous = self.mouse.replace(target.clone());

        let Some(tree) = self.tree() else {
            return;
        };
        if let Some(previous) = previous.filter(|p| p.state != MouseState::None) {
            tree.invalidate_cell(previous.row, &previous.column);
        }
        if let Some(target) = target {
            tree.invalidate_cell(target.row, &target.column);
        }
    }

    /// Repaints every visible row showing the item `guid`.
    pub fn invalidate_rows_by_guid(&self, guid: &str) -> ViewResult<()> {
        let Some(tree) = self.tree() else {
            return Ok(());
        };
        let Some((first, last)) = tree.visible_rows() else {
            return Ok(());
        };

        let paged = self.index.get();
        let length = self.array.length()?;
        let row_count = paged.to_row(length);
        if row_count == 0 {
            return Ok(());
        }
        let last = last.min(row_count - 1);

        for row in first..=last {
            if paged.is_synthetic_row(row) {
                continue;
            }
            let index = row - paged.offset();
            if self.array.guid_by_index(index)? == guid {
                tree.invalidate_row(row);
            }
        }
        trace!(guid, first, last, "Invalidated rows by guid");
        Ok(())
    }

    // =====================================================================
    // Editing
    // =====================================================================

    pub fn is_editable(&self, row: u32, column: &TreeColumn) -> ViewResult<bool> {
        if self.index.get().is_synthetic_row(row) {
            return Ok(false);
        }
        Ok(self.column_info(column)?.user_editable())
    }

    /// Writes `value` through to the item shown on `row`.
    ///
    /// Blank values are ignored unless the property is clickable. Writing the
    /// value the item already has does nothing.
    pub fn set_cell_text(&self, row: u32, column: &TreeColumn, value: &str) -> ViewResult<()> {
        let Some(index) = self.index.get().to_array_index(row) else {
            return Ok(());
        };

        let info = self.column_info(column)?;
        if info.clickable().is_none() && (value.is_empty() || value == " ") {
            return Ok(());
        }

        let guid = self.array.guid_by_index(index)?;
        let old = self.host.item_property(&guid, &column.property)?;
        if old.as_deref() == Some(value) {
            trace!(index, property = %column.property, "Cell value unchanged");
            return Ok(());
        }

        self.host.set_item_property(&guid, &column.property, value)?;
        debug!(index, guid = %guid, property = %column.property, "Cell edited");
        Ok(())
    }

    pub fn set_cell_value(&self, row: u32, column: &TreeColumn, value: &str) -> ViewResult<()> {
        self.set_cell_text(row, column, value)
    }

    // =====================================================================
    // Drag and Drop
    // =====================================================================

    /// Asks the observer, with the array index of `row`.
    pub fn can_drop(&self, row: u32, orientation: DropOrientation) -> bool {
        let Some(index) = self.index.get().to_array_index(row) else {
            return false;
        };
        self.observer()
            .is_some_and(|observer| observer.can_drop(index, orientation))
    }

    pub fn drop_on(&self, row: u32, orientation: DropOrientation) {
        let Some(index) = self.index.get().to_array_index(row) else {
            return;
        };
        if let Some(observer) = self.observer() {
            observer.on_drop(index, orientation);
        }
    }

    // =====================================================================
    // Flat List
    // =====================================================================

    pub fn is_container(&self, _row: u32) -> bool {
        false
    }

    pub fn is_container_open(&self, _row: u32) -> bool {
        false
    }

    pub fn is_container_empty(&self, _row: u32) -> bool {
        true
    }

    pub fn is_separator(&self, _row: u32) -> bool {
        false
    }

    pub fn is_sorted(&self) -> bool {
        true
    }

    pub fn level(&self, _row: u32) -> u32 {
        0
    }

    pub fn parent_index(&self, _row: u32) -> ViewResult<u32> {
        Err(ViewError::NotImplemented("parent_index"))
    }

    pub fn has_next_sibling(&self, _row: u32, _after: u32) -> ViewResult<bool> {
        Err(ViewError::NotImplemented("has_next_sibling"))
    }

    pub fn toggle_open_state(&self, _row: u32) -> ViewResult<()> {
        Err(ViewError::NotImplemented("toggle_open_state"))
    }

    pub fn cycle_cell(&self, _row: u32, _column: &TreeColumn) -> ViewResult<()> {
        Err(ViewError::NotImplemented("cycle_cell"))
    }

    pub fn is_selectable(&self, _row: u32, _column: &TreeColumn) -> ViewResult<bool> {
        Err(ViewError::NotImplemented("is_selectable"))
    }

    pub fn perform_action(&self, _action: &str) -> ViewResult<()> {
        Err(ViewError::NotImplemented("perform_action"))
    }

    pub fn perform_action_on_row(&self, _action: &str, _row: u32) -> ViewResult<()> {
        Err(ViewError::NotImplemented("perform_action_on_row"))
    }

    pub fn perform_action_on_cell(
        &self,
        _action: &str,
        _row: u32,
        _column: &TreeColumn,
    ) -> ViewResult<()> {
        Err(ViewError::NotImplemented("perform_action_on_cell"))
    }
}
