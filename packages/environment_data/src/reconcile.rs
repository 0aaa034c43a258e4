//! Incremental reconciliation of stored aggregates.
//!
//! An initial import wipes the data type and stores every granularity
//! from the frame. Incremental imports delete only the months the frame
//! covers, store them again, and recompute the affected years from their
//! stored months. Weeks, days, and hours are upserted on every run. The
//! run ends by moving the import watermark to the frame's last month.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Timelike};
use civic_map_database::environment_db::{self, BucketRow};
use civic_map_environment_data_models::{
    ColumnKey, DataType, DataTypeDefinition, Granularity, ImportMode, ImportState,
};
use duckdb::Connection;

use crate::EnvironmentDataError;
use crate::aggregate::{aggregate, reduce_values};
use crate::calendar::CalendarCache;
use crate::frame::MeasurementFrame;
use crate::progress::ProgressCallback;

/// Flags controlling one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Wipe the data type and import the frame from scratch.
    pub initial_import: bool,
    /// Proceed even when the frame starts after the month following the
    /// watermark.
    pub allow_gap: bool,
}

/// What an import run did.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    /// Reconciliation mode used.
    pub mode: ImportMode,
    /// First timestamp of the frame.
    pub first: NaiveDateTime,
    /// Last timestamp of the frame.
    pub last: NaiveDateTime,
    /// Measurements written per granularity.
    pub measurements: BTreeMap<Granularity, u64>,
    /// Fact rows (station and bucket pairs) stored for the data type per
    /// granularity once the run finished.
    pub stored: BTreeMap<Granularity, u64>,
    /// The watermark stored at the end of the run.
    pub state: ImportState,
}

/// Saves a measurement frame for `definition`'s data type.
///
/// Returns `Ok(None)` without touching the database when the frame is
/// empty.
///
/// # Errors
///
/// * [`EnvironmentDataError::WindowTooLong`] if the frame crosses more
///   than one year boundary
/// * [`EnvironmentDataError::MissingImportState`] for an incremental
///   import with no watermark
/// * [`EnvironmentDataError::WatermarkGap`] if an incremental frame
///   starts after the month following the watermark and
///   `options.allow_gap` is not set
/// * [`EnvironmentDataError::Database`] if any database operation fails
#[allow(clippy::too_many_lines)]
pub fn save_measurements(
    conn: &Connection,
    frame: &MeasurementFrame,
    definition: &DataTypeDefinition,
    options: ImportOptions,
    progress: &dyn ProgressCallback,
) -> Result<Option<ImportSummary>, EnvironmentDataError> {
    let data_type = definition.code;
    let (Some(first), Some(last)) = (frame.first(), frame.last()) else {
        log::warn!("{data_type}: empty measurement frame, nothing to import");
        return Ok(None);
    };

    if last.year() - first.year() > 1 {
        return Err(EnvironmentDataError::WindowTooLong {
            first_year: first.year(),
            last_year: last.year(),
        });
    }

    let mode = ImportMode::detect(options.initial_import, first, last);
    log::info!(
        "{data_type}: importing {} row(s) from {first} to {last} ({mode:?})",
        frame.len()
    );

    for column in frame.columns() {
        if !definition.knows(&column.parameter) {
            log::warn!(
                "{data_type}: unknown parameter {} on {}, averaging it",
                column.parameter,
                column.station
            );
        }
    }

    let week_frame = if mode == ImportMode::Initial {
        environment_db::delete_data_type(conn, data_type)?;
        None
    } else {
        check_watermark(conn, data_type, first, options.allow_gap)?;
        if first.day() != 1 || first.num_seconds_from_midnight() != 0 {
            log::warn!(
                "{data_type}: data starts at {first}, not at a month start; \
                 earlier days of that month will be dropped"
            );
        }
        // Read before the window's months are deleted.
        leading_week_backfill(conn, data_type, first)?
            .map(|earlier| frame.clone().with_earlier(earlier))
    };

    progress.set_total(u64::try_from(Granularity::ALL.len()).unwrap_or(0));

    let mut cache = CalendarCache::new(data_type);
    let mut measurements = BTreeMap::new();

    match mode {
        ImportMode::Initial => {}
        ImportMode::IncrementalSameYear => {
            let (year, from, until) = (first.year(), first.month(), last.month());
            environment_db::delete_months(conn, data_type, year, from, until)?;
            cache.forget_months();
        }
        ImportMode::IncrementalYearRollover => {
            environment_db::delete_months(conn, data_type, first.year(), first.month(), 12)?;
            environment_db::delete_months(conn, data_type, last.year(), 1, last.month())?;
            cache.forget_months();
        }
    }

    progress.set_message(format!("{data_type} months"));
    let written = save_granularity(conn, &mut cache, frame, Granularity::Month, definition)?;
    measurements.insert(Granularity::Month, written);
    progress.inc(1);

    progress.set_message(format!("{data_type} years"));
    let written = match mode {
        ImportMode::Initial => {
            save_granularity(conn, &mut cache, frame, Granularity::Year, definition)?
        }
        ImportMode::IncrementalSameYear => {
            save_current_year(conn, &mut cache, definition, first.year(), last.month())?
        }
        ImportMode::IncrementalYearRollover => {
            save_current_year(conn, &mut cache, definition, first.year(), 12)?
                + save_current_year(conn, &mut cache, definition, last.year(), last.month())?
        }
    };
    measurements.insert(Granularity::Year, written);
    progress.inc(1);

    for (granularity, source) in [
        (Granularity::Week, week_frame.as_ref().unwrap_or(frame)),
        (Granularity::Day, frame),
        (Granularity::Hour, frame),
    ] {
        progress.set_message(format!("{data_type} {granularity}s"));
        let written = save_granularity(conn, &mut cache, source, granularity, definition)?;
        measurements.insert(granularity, written);
        progress.inc(1);
    }

    let state = ImportState {
        data_type,
        year_number: last.year(),
        month_number: last.month(),
    };
    environment_db::set_import_state(conn, &state)?;

    let mut stored = BTreeMap::new();
    for granularity in Granularity::ALL {
        let rows = environment_db::count_fact_rows(conn, data_type, granularity)?;
        log::debug!("{data_type}: {rows} {granularity} fact row(s) stored");
        stored.insert(granularity, rows);
    }

    log::info!(
        "{data_type}: import state now {}-{:02} ({} calendar ids resolved)",
        state.year_number,
        state.month_number,
        cache.cached_calendar_ids()
    );
    progress.finish(format!(
        "{data_type} imported through {}-{:02}",
        state.year_number, state.month_number
    ));

    Ok(Some(ImportSummary {
        mode,
        first,
        last,
        measurements,
        stored,
        state,
    }))
}

fn check_watermark(
    conn: &Connection,
    data_type: DataType,
    first: NaiveDateTime,
    allow_gap: bool,
) -> Result<(), EnvironmentDataError> {
    let Some(state) = environment_db::get_import_state(conn, data_type)? else {
        return Err(EnvironmentDataError::MissingImportState { data_type });
    };

    if (first.year(), first.month()) > state.next_month() {
        if !allow_gap {
            return Err(EnvironmentDataError::WatermarkGap {
                data_type,
                watermark_year: state.year_number,
                watermark_month: state.month_number,
                start_year: first.year(),
                start_month: first.month(),
            });
        }
        log::warn!(
            "{data_type}: import state is {}-{:02} but data starts at {}-{:02}; \
             months in between stay empty",
            state.year_number,
            state.month_number,
            first.year(),
            first.month()
        );
    }

    Ok(())
}

/// Loads stored hourly values for the days of `first`'s ISO week that
/// precede `first`'s date, so week aggregates cover the whole week.
fn leading_week_backfill(
    conn: &Connection,
    data_type: DataType,
    first: NaiveDateTime,
) -> Result<Option<MeasurementFrame>, EnvironmentDataError> {
    let first_day = first.date();
    let offset = u64::from(first_day.weekday().num_days_from_monday());
    let week_start: NaiveDate = first_day
        .checked_sub_days(Days::new(offset))
        .unwrap_or(first_day);
    if week_start == first_day {
        return Ok(None);
    }

    let stored = environment_db::hour_values(conn, data_type, week_start, first_day)?;
    if stored.is_empty() {
        return Ok(None);
    }

    log::debug!(
        "{data_type}: including {} stored hourly value(s) from {week_start} in week aggregates",
        stored.len()
    );

    Ok(Some(MeasurementFrame::from_observations(
        stored
            .into_iter()
            .filter_map(|(date, hour, station, parameter, value)| {
                date.and_hms_opt(hour, 0, 0)
                    .map(|timestamp| (timestamp, ColumnKey { station, parameter }, value))
            }),
    )))
}

/// Aggregates `frame` at `granularity` and stores one fact row per
/// station and bucket. Returns the number of measurements written.
fn save_granularity(
    conn: &Connection,
    cache: &mut CalendarCache,
    frame: &MeasurementFrame,
    granularity: Granularity,
    definition: &DataTypeDefinition,
) -> Result<u64, EnvironmentDataError> {
    let ids = frame
        .columns()
        .iter()
        .map(|column| {
            Ok((
                cache.station(conn, &column.station)?,
                cache.parameter(conn, &column.parameter)?,
            ))
        })
        .collect::<Result<Vec<_>, EnvironmentDataError>>()?;

    let mut rows = Vec::new();
    for bucket in aggregate(frame, granularity, definition) {
        let bucket_id = cache.bucket(conn, bucket.key)?;
        let mut per_station: BTreeMap<i64, Vec<(i64, f64)>> = BTreeMap::new();
        for ((station_id, parameter_id), value) in ids.iter().zip(&bucket.values) {
            if let Some(value) = value {
                per_station
                    .entry(*station_id)
                    .or_default()
                    .push((*parameter_id, *value));
            }
        }
        rows.extend(per_station.into_iter().map(|(station_id, values)| BucketRow {
            station_id,
            bucket_id,
            values,
        }));
    }

    Ok(environment_db::save_bucket_rows(conn, granularity, &rows)?)
}

/// Recomputes a year's aggregates from its stored months
/// `1..=last_month`: per station and parameter, the mean over the months
/// carrying that parameter, or their sum for cumulative parameters.
fn save_current_year(
    conn: &Connection,
    cache: &mut CalendarCache,
    definition: &DataTypeDefinition,
    year: i32,
    last_month: u32,
) -> Result<u64, EnvironmentDataError> {
    let data_type = cache.data_type();
    let stored = environment_db::month_values(conn, data_type, year, 1, last_month)?;

    let mut grouped: BTreeMap<i64, BTreeMap<i64, (String, Vec<f64>)>> = BTreeMap::new();
    for (station_id, _month, parameter_id, parameter, value) in stored {
        grouped
            .entry(station_id)
            .or_default()
            .entry(parameter_id)
            .or_insert_with(|| (parameter, Vec::new()))
            .1
            .push(value);
    }

    let year_id = cache.year(conn, year)?;
    let rows: Vec<BucketRow> = grouped
        .into_iter()
        .map(|(station_id, parameters)| BucketRow {
            station_id,
            bucket_id: year_id,
            values: parameters
                .into_iter()
                .filter_map(|(parameter_id, (name, values))| {
                    reduce_values(&values, definition.is_cumulative(&name))
                        .map(|value| (parameter_id, value))
                })
                .collect(),
        })
        .collect();

    log::debug!(
        "{data_type}: recomputed {year} from months 1..={last_month} for {} station(s)",
        rows.len()
    );

    Ok(environment_db::save_bucket_rows(conn, Granularity::Year, &rows)?)
}
