//! tidefs Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, identifier
//! arithmetic and namespace path handling shared by the journal, the
//! metadata store and the admin tooling.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use config::{Config, JournalConfig, MasterConfig};
pub use error::{Error, Result};
pub use path::FsPath;
pub use types::*;
