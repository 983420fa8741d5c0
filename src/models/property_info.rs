//! Property schema: how raw property values are formatted and decorated.
//!
//! The view never interprets values itself. Every column binds a property id
//! and the [`PropertyManager`] supplies the [`PropertyInfo`] that formats it and,
//! optionally, the tree-view and clickable facets used for decoration tokens.

use std::rc::Rc;

use crate::error::{ViewError, ViewResult};

/// How a cell renders a progress meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    #[default]
    None,
    Normal,
    Undetermined,
}

/// Formatting rules for one property id.
pub trait PropertyInfo {
    fn id(&self) -> &str;

    /// Formats a raw stored value for display.
    fn format(&self, value: &str) -> ViewResult<String>;

    fn user_editable(&self) -> bool {
        false
    }

    fn tree_view(&self) -> Option<&dyn TreeViewPropertyInfo> {
        None
    }

    fn clickable(&self) -> Option<&dyn ClickablePropertyInfo> {
        None
    }
}

/// Grid-specific decorations derived from a value.
pub trait TreeViewPropertyInfo {
    /// Space separated row tokens.
    fn row_properties(&self, _value: &str) -> String {
        String::new()
    }

    /// Space separated cell tokens.
    fn cell_properties(&self, _value: &str) -> String {
        String::new()
    }

    fn image_src(&self, _value: &str) -> String {
        String::new()
    }

    fn progress_mode(&self, _value: &str) -> ProgressMode {
        ProgressMode::None
    }

    fn cell_value(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Properties the user can click on (ratings, checkboxes).
pub trait ClickablePropertyInfo {
    fn is_disabled(&self, value: &str) -> bool;
}

/// Lookup service for property infos.
pub trait PropertyManager {
    fn property_info(&self, id: &str) -> ViewResult<Rc<dyn PropertyInfo>>;

    /// Every known property id, in a stable order.
    fn property_ids(&self) -> Vec<String>;
}

/// Plain text property, displayed verbatim.
#[derive(Debug, Clone)]
pub struct TextProperty {
    id: String,
    editable: bool,
}

impl TextProperty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            editable: false,
        }
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }
}

impl PropertyInfo for TextProperty {
    fn id(&self) -> &str {
        &self.id
    }

    fn format(&self, value: &str) -> ViewResult<String> {
        Ok(value.to_string())
    }

    fn user_editable(&self) -> bool {
        self.editable
    }
}

/// Millisecond duration shown as `m:ss`.
#[derive(Debug, Clone)]
pub struct DurationProperty {
    id: String,
}

impl DurationProperty {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl PropertyInfo for DurationProperty {
    fn id(&self) -> &str {
        &self.id
    }

    fn format(&self, value: &str) -> ViewResult<String> {
        let ms: u64 = value
            .trim()
            .parse()
            .map_err(|_| ViewError::InvalidArgument(format!("not a duration: {value:?}")))?;
        let secs = ms / 1000;
        Ok(format!("{}:{:02}", secs / 60, secs % 60))
    }
}

/// 0-5 star rating. Decorates cells with `rating-N` and is clickable.
#[derive(Debug, Clone)]
pub struct RatingProperty {
    id: String,
}

impl RatingProperty {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl PropertyInfo for RatingProperty {
    fn id(&self) -> &str {
        &self.id
    }

    fn format(&self, value: &str) -> ViewResult<String> {
        Ok(value.to_string())
    }

    fn user_editable(&self) -> bool {
        true
    }

    fn tree_view(&self) -> Option<&dyn TreeViewPropertyInfo> {
        Some(self)
    }

    fn clickable(&self) -> Option<&dyn ClickablePropertyInfo> {
        Some(self)
    }
}

impl TreeViewPropertyInfo for RatingProperty {
    fn cell_properties(&self, value: &str) -> String {
        let stars = value.trim().parse::<u8>().unwrap_or(0).min(5);
        format!("rating rating-{stars}")
    }

    fn row_properties(&self, value: &str) -> String {
        match value.trim() {
            "5" => "favorite".to_string(),
            _ => String::new(),
        }
    }
}

impl ClickablePropertyInfo for RatingProperty {
    fn is_disabled(&self, value: &str) -> bool {
        value.trim() == "-1"
    }
}

/// Registry of property infos keyed by id, in registration order.
#[derive(Default)]
pub struct PropertySchema {
    infos: Vec<Rc<dyn PropertyInfo>>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, info: impl PropertyInfo + 'static) -> Self {
        let info: Rc<dyn PropertyInfo> = Rc::new(info);
        self.infos.retain(|existing| existing.id() != info.id());
        self.infos.push(info);
        self
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

impl PropertyManager for PropertySchema {
    fn property_info(&self, id: &str) -> ViewResult<Rc<dyn PropertyInfo>> {
        self.infos
            .iter()
            .find(|info| info.id() == id)
            .cloned()
            .ok_or_else(|| ViewError::InvalidArgument(format!("unknown property {id:?}")))
    }

    fn property_ids(&self) -> Vec<String> {
        self.infos.iter().map(|info| info.id().to_string()).collect()
    }
}
