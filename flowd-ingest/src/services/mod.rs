//! External collaborators of the commit pipeline

pub mod definition_scanner;

pub use definition_scanner::DefinitionScanner;
