#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` storage for the civic map pipelines.
//!
//! Each concern gets its own `DuckDB` file under `data/shared/`: bicycle
//! networks and their parts in one, the environment data calendar
//! lattice, fact rows and import watermarks in another. Schemas are
//! created on open; geometry is stored as `GeoJSON` TEXT.

pub mod environment_db;
pub mod network_db;
pub mod paths;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Renders a list of database ids as a comma-separated SQL literal list.
///
/// Only used with ids read back from the database, never with user input.
pub(crate) fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
