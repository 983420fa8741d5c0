//! Windowed, asynchronously paged tree view over a large sortable media list.
//!
//! A UI grid asks [`view::MediaTreeView`] for row counts, cell text and
//! decorations. Answers come from a page cache; misses are fetched from a
//! [`array::GuidArray`] in the background and repainted when they land.

pub mod array;
pub mod config;
pub mod error;
pub mod models;
pub mod tree;
pub mod view;

#[cfg(test)]
mod testing;

pub use array::{ArrayEvent, ArrayState, GuidArray, PropertyCache};
pub use config::{StoreConfig, ViewConfig};
pub use error::{ArrayError, ViewError, ViewResult};
pub use view::{ListKind, MediaTreeView, RowCountState, TreeViewBuilder};
