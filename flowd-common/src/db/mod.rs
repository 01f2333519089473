//! Database initialization and queries

pub mod init;
pub mod settings;

pub use init::*;
pub use settings::*;
