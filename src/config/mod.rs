//! Configuration loading and parsing.
//!
//! This module loads YAML workflow definitions and resolves their variables.

mod definition;
mod error;
pub mod vars;

pub use definition::Definition;
pub use error::ConfigError;
