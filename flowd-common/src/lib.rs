//! # FLOWD Common Library
//!
//! Shared code for the flowd workflow-definition processor:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Database initialization and schema management

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
