use std::collections::HashMap;

/// Globally unique identifier of a media item in the backing store.
pub type Guid = String;

/// Formatted property values of one media item, keyed by property id.
///
/// Bags are immutable once fetched and shared between the view caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    guid: Guid,
    values: HashMap<String, String>,
}

impl PropertyBag {
    pub fn new(guid: impl Into<Guid>) -> Self {
        Self {
            guid: guid.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(property.into(), value.into());
        self
    }

    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.values.insert(property.into(), value.into());
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.values.get(property).map(String::as_str)
    }

    /// Value of `property`, or the empty string when the item has none.
    pub fn value(&self, property: &str) -> &str {
        self.get(property).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
