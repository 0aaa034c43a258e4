#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command handlers for the civic map ingestion tool.
//!
//! The binary parses arguments and opens databases; everything it prints
//! or imports goes through the functions here.

use std::path::Path;
use std::str::FromStr;

use civic_map_bicycle_network_models::BicycleNetworkSummary;
use civic_map_database::{DbError, environment_db};
use civic_map_environment_data::EnvironmentDataError;
use civic_map_environment_data::frame::MeasurementFrame;
use civic_map_environment_data::progress::ProgressCallback;
use civic_map_environment_data::reconcile::{ImportOptions, ImportSummary, save_measurements};
use civic_map_environment_data::registry::{all_data_types, data_type_definition};
use civic_map_environment_data_models::{DataType, DataTypeDefinition, ImportState};
use duckdb::Connection;

/// Parses a data type code (`AQ`, `WO`) from the command line.
///
/// # Errors
///
/// Returns a message listing the registered codes if `value` is not one.
pub fn parse_data_type(value: &str) -> Result<DataType, String> {
    DataType::from_str(value.trim()).map_err(|_| {
        let codes: Vec<String> = all_data_types()
            .iter()
            .map(|d| d.code.to_string())
            .collect();
        format!("unknown data type '{value}', expected one of: {}", codes.join(", "))
    })
}

/// Looks up a registered data type definition.
///
/// # Errors
///
/// Returns [`EnvironmentDataError::UnknownDataType`] if none is registered.
pub fn definition_for(data_type: DataType) -> Result<DataTypeDefinition, EnvironmentDataError> {
    data_type_definition(data_type)
        .ok_or_else(|| EnvironmentDataError::UnknownDataType(data_type.to_string()))
}

/// Reads a measurement CSV and imports it for `data_type`.
///
/// Returns `Ok(None)` if the file holds no rows.
///
/// # Errors
///
/// Returns [`EnvironmentDataError`] if the data type is unknown, the CSV
/// cannot be read, or the import is refused or fails.
pub fn import_environment_file(
    conn: &Connection,
    path: &Path,
    data_type: DataType,
    options: ImportOptions,
    progress: &dyn ProgressCallback,
) -> Result<Option<ImportSummary>, EnvironmentDataError> {
    let definition = definition_for(data_type)?;
    let frame = MeasurementFrame::from_csv_path(path)?;
    log::info!(
        "Read {} row(s) x {} column(s) from {}",
        frame.len(),
        frame.columns().len(),
        path.display()
    );
    save_measurements(conn, &frame, &definition, options, progress)
}

/// Records a station's location, creating the station if it has not
/// appeared in any import yet. Returns the station id.
///
/// # Errors
///
/// Returns [`DbError`] if the lookup or update fails.
pub fn locate_station(
    conn: &Connection,
    data_type: DataType,
    name: &str,
    longitude: f64,
    latitude: f64,
) -> Result<i64, DbError> {
    let station_id = environment_db::get_or_create_station(conn, data_type, name)?;
    environment_db::set_station_location(conn, station_id, longitude, latitude)?;
    log::info!("{data_type}: {name} located at ({longitude}, {latitude})");
    Ok(station_id)
}

/// Renders the network listing.
#[must_use]
pub fn format_networks(networks: &[BicycleNetworkSummary]) -> String {
    let mut out = format!("{:<6} {:<30} {:>8} {:>14}\n", "ID", "NAME", "PARTS", "LENGTH (m)");
    out.push_str(&"-".repeat(61));
    out.push('\n');
    for summary in networks {
        let network = &summary.network;
        out.push_str(&format!(
            "{:<6} {:<30} {:>8} {:>14.2}\n",
            network.id,
            network.name.as_deref().unwrap_or("-"),
            summary.part_count,
            network.length
        ));
    }
    out
}

/// Renders a data type's import watermark and where the next fetch
/// should start.
#[must_use]
pub fn format_import_state(data_type: DataType, state: Option<&ImportState>) -> String {
    match state {
        None => format!("{data_type}: no import state, run an initial import first"),
        Some(state) => {
            let resume = state.resume_start().map_or_else(
                || "invalid".to_string(),
                |t| t.format("%Y-%m-%dT%H:%M:%S").to_string(),
            );
            format!(
                "{data_type}: imported through {}-{:02}, next fetch starts at {resume}",
                state.year_number, state.month_number
            )
        }
    }
}

/// Renders registered data types and their parameters.
#[must_use]
pub fn format_data_types(definitions: &[DataTypeDefinition]) -> String {
    let mut out = String::new();
    for definition in definitions {
        out.push_str(&format!("{} {}\n", definition.code, definition.name));
        for parameter in &definition.parameters {
            out.push_str(&format!(
                "  {:<16} {}{}\n",
                parameter.name,
                parameter.description,
                if parameter.cumulative { " (cumulative)" } else { "" }
            ));
        }
    }
    out
}

/// Renders an import run's outcome.
#[must_use]
pub fn format_import_summary(data_type: DataType, summary: &ImportSummary) -> String {
    let mut out = format!(
        "{data_type}: {:?} import of {} to {}\n",
        summary.mode, summary.first, summary.last
    );
    for (granularity, written) in &summary.measurements {
        let stored = summary.stored.get(granularity).copied().unwrap_or(0);
        out.push_str(&format!(
            "  {:<6} {written} measurement(s) written, {stored} fact row(s) stored\n",
            granularity.as_ref()
        ));
    }
    out.push_str(&format!(
        "  import state now {}-{:02}",
        summary.state.year_number, summary.state.month_number
    ));
    out
}
