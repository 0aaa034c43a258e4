#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the `DuckDB` data directory.
//!
//! All paths are relative to the project root's `data/` directory unless
//! `CIVIC_MAP_DATA_DIR` points somewhere else.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .map_or_else(|| manifest_dir.to_path_buf(), Path::to_path_buf)
}

/// Returns the `data/` directory path, honouring `CIVIC_MAP_DATA_DIR`.
#[must_use]
pub fn data_dir() -> PathBuf {
    std::env::var_os("CIVIC_MAP_DATA_DIR")
        .map_or_else(|| project_root().join("data"), PathBuf::from)
}

/// Returns the `data/shared/` directory for shared databases.
#[must_use]
pub fn shared_dir() -> PathBuf {
    data_dir().join("shared")
}

/// Returns the `data/uploads/` directory where uploaded `GeoJSON` files
/// are staged until processed.
#[must_use]
pub fn uploads_dir() -> PathBuf {
    data_dir().join("uploads")
}

/// Returns the path for the bicycle networks `DuckDB` file.
#[must_use]
pub fn network_db_path() -> PathBuf {
    shared_dir().join("bicycle_networks.duckdb")
}

/// Returns the path for the environment data `DuckDB` file.
#[must_use]
pub fn environment_db_path() -> PathBuf {
    shared_dir().join("environment_data.duckdb")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
