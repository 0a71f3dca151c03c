//! # btrvol-common
//!
//! Shared types for the btrvol volume plugin:
//! - The error taxonomy returned by every lifecycle operation
//! - Well-known filesystem paths (home directory, state documents)

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;

pub use error::{BtrvolError, BtrvolResult};
pub use name::validate_name;
pub use paths::BtrvolPaths;
