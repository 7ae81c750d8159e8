//! Core types, configuration, and error handling for prepdiff.
//!
//! This crate provides the shared foundation used by the other prepdiff crates:
//! - [`PrepdiffError`] — unified error type using `thiserror`
//! - [`PrepdiffConfig`] — configuration loaded from `.prepdiff.toml`
//! - Shared types: [`FileKind`], [`Tolerance`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{CompareConfig, DatasetConfig, PrepdiffConfig, CONFIG_FILE_NAME};
pub use error::PrepdiffError;
pub use types::{FileKind, OutputFormat, Tolerance};
