//! tidefs Master - Metadata store
//!
//! The namespace service of the master. Requests are validated against the
//! in-memory tree, applied, and journaled before they are acknowledged.
//! Block locations reported by workers are kept here too; they are never
//! journaled and start empty after every restart.

pub mod info;
pub mod store;
pub mod view;

pub use info::{BlockLocations, FileInfo, TableInfo};
pub use store::MetadataStore;
pub use view::NamespaceView;
