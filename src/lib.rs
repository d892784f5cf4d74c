//! Content index for a file-backed publishing site.
//!
//! The scanner keeps a SQLite index in step with a tree of content files,
//! views query that index, and a bounded dispatcher runs rescans and outbound
//! webmentions in the background.

pub mod config;
pub mod content;
pub mod context;
pub mod db;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod model;
pub mod publish;
pub mod render;
pub mod scanner;
pub mod view;
pub mod webmention;

pub use context::AppContext;
pub use dispatcher::Dispatcher;
pub use entry::Entry;
pub use view::{View, ViewSpec};
