#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Environmental measurement import.
//!
//! Loads a time-indexed [`frame::MeasurementFrame`] of
//! `"{station} {parameter}"` columns, reduces it to calendar buckets
//! ([`aggregate`]), resolves the calendar lattice through a run-scoped
//! [`calendar::CalendarCache`], and reconciles stored aggregates with the
//! incremental import state machine in [`reconcile`].

pub mod aggregate;
pub mod calendar;
pub mod frame;
pub mod progress;
pub mod reconcile;
pub mod registry;

use civic_map_database::DbError;
use civic_map_environment_data_models::DataType;
use thiserror::Error;

/// Errors that can occur during an environment data import.
#[derive(Debug, Error)]
pub enum EnvironmentDataError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// CSV reading failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Reading the input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The measurement table is malformed.
    #[error("Invalid measurement frame: {message}")]
    InvalidFrame {
        /// Description of what is wrong.
        message: String,
    },

    /// The data type has no registered definition.
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// An incremental import was requested before any initial import.
    #[error("No import state for {data_type}; run an initial import first")]
    MissingImportState {
        /// The data type.
        data_type: DataType,
    },

    /// The frame starts after the month following the watermark, so at
    /// least one month would never be imported.
    #[error(
        "{data_type} import state is at {watermark_year}-{watermark_month:02} but the data starts at \
         {start_year}-{start_month:02}; months in between would be missing"
    )]
    WatermarkGap {
        /// The data type.
        data_type: DataType,
        /// Watermark year.
        watermark_year: i32,
        /// Watermark month.
        watermark_month: u32,
        /// Year of the first row.
        start_year: i32,
        /// Month of the first row.
        start_month: u32,
    },

    /// The frame crosses more than one year boundary.
    #[error("Data spans {first_year} to {last_year}; at most one year boundary is supported")]
    WindowTooLong {
        /// Year of the first row.
        first_year: i32,
        /// Year of the last row.
        last_year: i32,
    },
}
