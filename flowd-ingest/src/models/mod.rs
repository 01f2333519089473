//! Data model for the ingest service

pub mod outcome;
pub mod parsing_result;

pub use outcome::*;
pub use parsing_result::*;
