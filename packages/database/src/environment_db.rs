//! Environment data storage in `DuckDB`.
//!
//! Holds the calendar lattice (years, months, ISO weeks and their
//! calendar-year memberships, days, hours), station and parameter
//! dimensions, one fact table per granularity keyed uniquely by
//! `(station, bucket)`, the measurements hanging off fact rows, and the
//! per-data-type import watermark.
//!
//! Calendar rows are created with get-or-create semantics backed by
//! natural-key `UNIQUE` constraints, so re-running an import never
//! duplicates rows.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use civic_map_environment_data_models::{DataType, Granularity, ImportState};
use duckdb::Connection;

use crate::{DbError, id_list};

/// Number of rows per multi-row INSERT chunk.
const CHUNK_SIZE: usize = 1_000;

/// A fact row to store: one station, one calendar bucket, and its
/// `(parameter_id, value)` measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketRow {
    /// Station id.
    pub station_id: i64,
    /// Calendar bucket id (year, month, week, day or hour id).
    pub bucket_id: i64,
    /// Measurements as `(parameter_id, value)`.
    pub values: Vec<(i64, f64)>,
}

/// A stored month measurement:
/// `(station_id, month_number, parameter_id, parameter_name, value)`.
pub type MonthValue = (i64, u32, i64, String, f64);

/// A stored hourly measurement: `(date, hour, station_name, parameter_name, value)`.
pub type HourValue = (NaiveDate, u32, String, String, f64);

/// A stored measurement with its bucket label: `(bucket, station, parameter, value)`.
pub type StoredMeasurement = (String, String, String, f64);

/// Opens (or creates) the environment data `DuckDB` and ensures the
/// schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;

    conn.execute_batch("SET threads = 4; SET memory_limit = '512MB';")?;

    create_schema(&conn)?;

    Ok(conn)
}

/// Opens the environment data DB at the default path.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_default() -> Result<Connection, DbError> {
    open(&crate::paths::environment_db_path())
}

/// Creates the environment data tables on an existing connection.
///
/// # Errors
///
/// Returns [`DbError`] if a DDL statement fails.
#[allow(clippy::too_many_lines)]
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS stations_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS parameters_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS years_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS months_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS weeks_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS days_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS hours_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS year_data_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS month_data_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS week_data_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS day_data_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS hour_data_id_seq START 1;
        CREATE SEQUENCE IF NOT EXISTS measurements_id_seq START 1;

        CREATE TABLE IF NOT EXISTS stations (
            id BIGINT PRIMARY KEY DEFAULT nextval('stations_id_seq'),
            data_type TEXT NOT NULL,
            name TEXT NOT NULL,
            longitude DOUBLE,
            latitude DOUBLE,
            UNIQUE (data_type, name)
        );

        CREATE TABLE IF NOT EXISTS parameters (
            id BIGINT PRIMARY KEY DEFAULT nextval('parameters_id_seq'),
            data_type TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (data_type, name)
        );

        CREATE TABLE IF NOT EXISTS years (
            id BIGINT PRIMARY KEY DEFAULT nextval('years_id_seq'),
            data_type TEXT NOT NULL,
            year_number INTEGER NOT NULL,
            UNIQUE (data_type, year_number)
        );

        CREATE TABLE IF NOT EXISTS months (
            id BIGINT PRIMARY KEY DEFAULT nextval('months_id_seq'),
            year_id BIGINT NOT NULL,
            month_number INTEGER NOT NULL,
            UNIQUE (year_id, month_number)
        );

        CREATE TABLE IF NOT EXISTS weeks (
            id BIGINT PRIMARY KEY DEFAULT nextval('weeks_id_seq'),
            data_type TEXT NOT NULL,
            iso_year INTEGER NOT NULL,
            week_number INTEGER NOT NULL,
            UNIQUE (data_type, iso_year, week_number)
        );

        CREATE TABLE IF NOT EXISTS week_years (
            week_id BIGINT NOT NULL,
            year_id BIGINT NOT NULL,
            PRIMARY KEY (week_id, year_id)
        );

        CREATE TABLE IF NOT EXISTS days (
            id BIGINT PRIMARY KEY DEFAULT nextval('days_id_seq'),
            data_type TEXT NOT NULL,
            day_date DATE NOT NULL,
            weekday_number INTEGER NOT NULL,
            year_id BIGINT NOT NULL,
            month_id BIGINT NOT NULL,
            week_id BIGINT NOT NULL,
            UNIQUE (data_type, day_date)
        );

        CREATE TABLE IF NOT EXISTS hours (
            id BIGINT PRIMARY KEY DEFAULT nextval('hours_id_seq'),
            day_id BIGINT NOT NULL,
            hour_number INTEGER NOT NULL,
            UNIQUE (day_id, hour_number)
        );

        CREATE TABLE IF NOT EXISTS year_data (
            id BIGINT PRIMARY KEY DEFAULT nextval('year_data_id_seq'),
            station_id BIGINT NOT NULL,
            year_id BIGINT NOT NULL,
            UNIQUE (station_id, year_id)
        );

        CREATE TABLE IF NOT EXISTS month_data (
            id BIGINT PRIMARY KEY DEFAULT nextval('month_data_id_seq'),
            station_id BIGINT NOT NULL,
            month_id BIGINT NOT NULL,
            UNIQUE (station_id, month_id)
        );

        CREATE TABLE IF NOT EXISTS week_data (
            id BIGINT PRIMARY KEY DEFAULT nextval('week_data_id_seq'),
            station_id BIGINT NOT NULL,
            week_id BIGINT NOT NULL,
            UNIQUE (station_id, week_id)
        );

        CREATE TABLE IF NOT EXISTS day_data (
            id BIGINT PRIMARY KEY DEFAULT nextval('day_data_id_seq'),
            station_id BIGINT NOT NULL,
            day_id BIGINT NOT NULL,
            UNIQUE (station_id, day_id)
        );

        CREATE TABLE IF NOT EXISTS hour_data (
            id BIGINT PRIMARY KEY DEFAULT nextval('hour_data_id_seq'),
            station_id BIGINT NOT NULL,
            hour_id BIGINT NOT NULL,
            UNIQUE (station_id, hour_id)
        );

        CREATE TABLE IF NOT EXISTS measurements (
            id BIGINT PRIMARY KEY DEFAULT nextval('measurements_id_seq'),
            granularity TEXT NOT NULL,
            data_id BIGINT NOT NULL,
            parameter_id BIGINT NOT NULL,
            value DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_states (
            data_type TEXT PRIMARY KEY,
            year_number INTEGER NOT NULL,
            month_number INTEGER NOT NULL
        );",
    )?;

    Ok(())
}

/// Fact table and its bucket column for a granularity.
const fn fact_table(granularity: Granularity) -> (&'static str, &'static str) {
    match granularity {
        Granularity::Year => ("year_data", "year_id"),
        Granularity::Month => ("month_data", "month_id"),
        Granularity::Week => ("week_data", "week_id"),
        Granularity::Day => ("day_data", "day_id"),
        Granularity::Hour => ("hour_data", "hour_id"),
    }
}

/// `FROM ... JOIN ...` clause reaching a fact table's calendar rows, the
/// bucket label expression, and the column carrying the data type.
const fn fact_joins(granularity: Granularity) -> (&'static str, &'static str, &'static str) {
    match granularity {
        Granularity::Year => (
            "year_data fd JOIN years y ON fd.year_id = y.id",
            "CAST(y.year_number AS VARCHAR)",
            "y.data_type",
        ),
        Granularity::Month => (
            "month_data fd JOIN months m ON fd.month_id = m.id JOIN years y ON m.year_id = y.id",
            "printf('%04d-%02d', y.year_number, m.month_number)",
            "y.data_type",
        ),
        Granularity::Week => (
            "week_data fd JOIN weeks w ON fd.week_id = w.id",
            "printf('%04d-W%02d', w.iso_year, w.week_number)",
            "w.data_type",
        ),
        Granularity::Day => (
            "day_data fd JOIN days d ON fd.day_id = d.id",
            "CAST(d.day_date AS VARCHAR)",
            "d.data_type",
        ),
        Granularity::Hour => (
            "hour_data fd JOIN hours h ON fd.hour_id = h.id JOIN days d ON h.day_id = d.id",
            "printf('%s %02d:00', CAST(d.day_date AS VARCHAR), h.hour_number)",
            "d.data_type",
        ),
    }
}

fn number_from_db(value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::Conversion {
        message: format!("Invalid stored month/hour number {value}"),
    })
}

// ============================================================
// Dimensions
// ============================================================

/// Returns the id of a station, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_station(
    conn: &Connection,
    data_type: DataType,
    name: &str,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO stations (data_type, name) VALUES (?, ?)
         ON CONFLICT (data_type, name) DO NOTHING",
        duckdb::params![data_type.as_ref(), name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM stations WHERE data_type = ? AND name = ?",
        duckdb::params![data_type.as_ref(), name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Sets a station's location.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn set_station_location(
    conn: &Connection,
    station_id: i64,
    longitude: f64,
    latitude: f64,
) -> Result<(), DbError> {
    conn.execute(
        "UPDATE stations SET longitude = ?, latitude = ? WHERE id = ?",
        duckdb::params![longitude, latitude, station_id],
    )?;
    Ok(())
}

/// Returns the id of a parameter, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_parameter(
    conn: &Connection,
    data_type: DataType,
    name: &str,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO parameters (data_type, name) VALUES (?, ?)
         ON CONFLICT (data_type, name) DO NOTHING",
        duckdb::params![data_type.as_ref(), name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM parameters WHERE data_type = ? AND name = ?",
        duckdb::params![data_type.as_ref(), name],
        |row| row.get(0),
    )?;
    Ok(id)
}

// ============================================================
// Calendar lattice
// ============================================================

/// Returns the id of a year row, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_year(
    conn: &Connection,
    data_type: DataType,
    year_number: i32,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO years (data_type, year_number) VALUES (?, ?)
         ON CONFLICT (data_type, year_number) DO NOTHING",
        duckdb::params![data_type.as_ref(), year_number],
    )?;
    let id = conn.query_row(
        "SELECT id FROM years WHERE data_type = ? AND year_number = ?",
        duckdb::params![data_type.as_ref(), year_number],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Returns the id of a month row, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_month(
    conn: &Connection,
    year_id: i64,
    month_number: u32,
) -> Result<i64, DbError> {
    let month_number = i64::from(month_number);
    conn.execute(
        "INSERT INTO months (year_id, month_number) VALUES (?, ?)
         ON CONFLICT (year_id, month_number) DO NOTHING",
        duckdb::params![year_id, month_number],
    )?;
    let id = conn.query_row(
        "SELECT id FROM months WHERE year_id = ? AND month_number = ?",
        duckdb::params![year_id, month_number],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Returns the id of an ISO week row, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_week(
    conn: &Connection,
    data_type: DataType,
    iso_year: i32,
    week_number: u32,
) -> Result<i64, DbError> {
    let week_number = i64::from(week_number);
    conn.execute(
        "INSERT INTO weeks (data_type, iso_year, week_number) VALUES (?, ?, ?)
         ON CONFLICT (data_type, iso_year, week_number) DO NOTHING",
        duckdb::params![data_type.as_ref(), iso_year, week_number],
    )?;
    let id = conn.query_row(
        "SELECT id FROM weeks WHERE data_type = ? AND iso_year = ? AND week_number = ?",
        duckdb::params![data_type.as_ref(), iso_year, week_number],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Associates a week with a calendar year. Idempotent.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub fn add_week_year(conn: &Connection, week_id: i64, year_id: i64) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO week_years (week_id, year_id) VALUES (?, ?)
         ON CONFLICT (week_id, year_id) DO NOTHING",
        duckdb::params![week_id, year_id],
    )?;
    Ok(())
}

/// Returns the year numbers a week is associated with, ascending.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn week_year_numbers(conn: &Connection, week_id: i64) -> Result<Vec<i32>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT y.year_number FROM week_years wy JOIN years y ON wy.year_id = y.id
         WHERE wy.week_id = ? ORDER BY y.year_number",
    )?;
    let rows = stmt.query_map([week_id], |row| row.get(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Calendar ids a day row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayParents {
    /// Year id.
    pub year_id: i64,
    /// Month id.
    pub month_id: i64,
    /// Week id.
    pub week_id: i64,
}

/// Returns the id of a day row, creating it if needed.
///
/// `weekday_number` counts from Monday = 0.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_day(
    conn: &Connection,
    data_type: DataType,
    date: NaiveDate,
    weekday_number: u32,
    parents: DayParents,
) -> Result<i64, DbError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    conn.execute(
        "INSERT INTO days (data_type, day_date, weekday_number, year_id, month_id, week_id)
         VALUES (?, CAST(? AS DATE), ?, ?, ?, ?)
         ON CONFLICT (data_type, day_date) DO NOTHING",
        duckdb::params![
            data_type.as_ref(),
            date_str,
            i64::from(weekday_number),
            parents.year_id,
            parents.month_id,
            parents.week_id,
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM days WHERE data_type = ? AND day_date = CAST(? AS DATE)",
        duckdb::params![data_type.as_ref(), date_str],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Returns the id of an hour row, creating it if needed.
///
/// # Errors
///
/// Returns [`DbError`] if the insert or lookup fails.
pub fn get_or_create_hour(
    conn: &Connection,
    day_id: i64,
    hour_number: u32,
) -> Result<i64, DbError> {
    let hour_number = i64::from(hour_number);
    conn.execute(
        "INSERT INTO hours (day_id, hour_number) VALUES (?, ?)
         ON CONFLICT (day_id, hour_number) DO NOTHING",
        duckdb::params![day_id, hour_number],
    )?;
    let id = conn.query_row(
        "SELECT id FROM hours WHERE day_id = ? AND hour_number = ?",
        duckdb::params![day_id, hour_number],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Returns the year numbers stored for a data type, ascending.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn list_years(conn: &Connection, data_type: DataType) -> Result<Vec<i32>, DbError> {
    let mut stmt =
        conn.prepare("SELECT year_number FROM years WHERE data_type = ? ORDER BY year_number")?;
    let rows = stmt.query_map([data_type.as_ref()], |row| row.get(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

// ============================================================
// Fact rows
// ============================================================

/// Stores fact rows and their measurements for one granularity.
///
/// Fact rows are get-or-created on `(station, bucket)`; any
/// measurements an existing row already had are replaced, so saving
/// the same rows twice leaves exactly one row with one set of values.
/// Rows and measurements are written with chunked multi-row INSERTs.
///
/// Returns the number of measurements written.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub fn save_bucket_rows(
    conn: &Connection,
    granularity: Granularity,
    rows: &[BucketRow],
) -> Result<u64, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let (table, bucket_column) = fact_table(granularity);
    let mut data_ids: BTreeMap<(i64, i64), i64> = BTreeMap::new();

    for chunk in rows.chunks(CHUNK_SIZE) {
        let placeholders = chunk.iter().map(|_| "(?, ?)").collect::<Vec<_>>().join(", ");
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {table} (station_id, {bucket_column}) VALUES {placeholders}
             ON CONFLICT (station_id, {bucket_column}) DO NOTHING"
        ))?;
        for (i, row) in chunk.iter().enumerate() {
            stmt.raw_bind_parameter(i * 2 + 1, row.station_id)?;
            stmt.raw_bind_parameter(i * 2 + 2, row.bucket_id)?;
        }
        stmt.raw_execute()?;

        let bucket_ids: Vec<i64> = chunk.iter().map(|r| r.bucket_id).collect();
        let mut select = conn.prepare(&format!(
            "SELECT id, station_id, {bucket_column} FROM {table}
             WHERE {bucket_column} IN ({})",
            id_list(&bucket_ids)
        ))?;
        let found = select.query_map([], |row| {
            Ok(((row.get::<_, i64>(1)?, row.get::<_, i64>(2)?), row.get::<_, i64>(0)?))
        })?;
        for entry in found {
            let (key, id) = entry?;
            data_ids.insert(key, id);
        }
    }

    let mut owned: Vec<(i64, &BucketRow)> = Vec::with_capacity(rows.len());
    for row in rows {
        let id = data_ids
            .get(&(row.station_id, row.bucket_id))
            .copied()
            .ok_or_else(|| DbError::Conversion {
                message: format!(
                    "{table} row for station {} bucket {} missing after insert",
                    row.station_id, row.bucket_id
                ),
            })?;
        owned.push((id, row));
    }

    for chunk in owned.chunks(CHUNK_SIZE) {
        let ids: Vec<i64> = chunk.iter().map(|(id, _)| *id).collect();
        conn.execute(
            &format!(
                "DELETE FROM measurements WHERE granularity = ? AND data_id IN ({})",
                id_list(&ids)
            ),
            [granularity.as_ref()],
        )?;
    }

    let measurements: Vec<(i64, i64, f64)> = owned
        .iter()
        .flat_map(|(data_id, row)| {
            row.values
                .iter()
                .map(move |(parameter_id, value)| (*data_id, *parameter_id, *value))
        })
        .collect();

    let mut written = 0u64;
    for chunk in measurements.chunks(CHUNK_SIZE) {
        let placeholders = chunk
            .iter()
            .map(|_| "(?, ?, ?, ?)")
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO measurements (granularity, data_id, parameter_id, value) VALUES {placeholders}"
        ))?;
        for (i, (data_id, parameter_id, value)) in chunk.iter().enumerate() {
            let base = i * 4 + 1;
            stmt.raw_bind_parameter(base, granularity.as_ref())?;
            stmt.raw_bind_parameter(base + 1, *data_id)?;
            stmt.raw_bind_parameter(base + 2, *parameter_id)?;
            stmt.raw_bind_parameter(base + 3, *value)?;
        }
        let inserted = stmt.raw_execute()?;
        written += u64::try_from(inserted).unwrap_or(0);
    }

    log::debug!(
        "Saved {} {granularity} rows with {written} measurements",
        rows.len()
    );

    Ok(written)
}

/// Deletes months `first_month..=last_month` of a data type's year and
/// everything hanging off them: their days, hours, and the fact rows and
/// measurements of all three granularities. Weeks are left in place.
///
/// Returns the number of month rows deleted.
///
/// # Errors
///
/// Returns [`DbError`] if any delete fails; nothing is deleted then.
pub fn delete_months(
    conn: &Connection,
    data_type: DataType,
    year_number: i32,
    first_month: u32,
    last_month: u32,
) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(
        "SELECT m.id FROM months m JOIN years y ON m.year_id = y.id
         WHERE y.data_type = ? AND y.year_number = ?
           AND m.month_number BETWEEN ? AND ?",
    )?;
    let month_ids = stmt
        .query_map(
            duckdb::params![
                data_type.as_ref(),
                year_number,
                i64::from(first_month),
                i64::from(last_month)
            ],
            |row| row.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    if month_ids.is_empty() {
        return Ok(0);
    }

    let ids = id_list(&month_ids);
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        "DELETE FROM measurements WHERE granularity = 'hour' AND data_id IN (
            SELECT fd.id FROM hour_data fd
            JOIN hours h ON fd.hour_id = h.id
            JOIN days d ON h.day_id = d.id
            WHERE d.month_id IN ({ids}));
        DELETE FROM hour_data WHERE hour_id IN (
            SELECT h.id FROM hours h JOIN days d ON h.day_id = d.id
            WHERE d.month_id IN ({ids}));
        DELETE FROM hours WHERE day_id IN (SELECT id FROM days WHERE month_id IN ({ids}));
        DELETE FROM measurements WHERE granularity = 'day' AND data_id IN (
            SELECT fd.id FROM day_data fd JOIN days d ON fd.day_id = d.id
            WHERE d.month_id IN ({ids}));
        DELETE FROM day_data WHERE day_id IN (SELECT id FROM days WHERE month_id IN ({ids}));
        DELETE FROM days WHERE month_id IN ({ids});
        DELETE FROM measurements WHERE granularity = 'month' AND data_id IN (
            SELECT id FROM month_data WHERE month_id IN ({ids}));
        DELETE FROM month_data WHERE month_id IN ({ids});
        DELETE FROM months WHERE id IN ({ids});"
    ))?;
    tx.commit()?;

    let deleted = u64::try_from(month_ids.len()).unwrap_or(u64::MAX);
    log::info!(
        "{data_type}: deleted {deleted} month(s) {first_month}..={last_month} of {year_number} \
         with their days and hours"
    );

    Ok(deleted)
}

/// Removes every calendar row, fact row, measurement and the import
/// watermark of a data type in one transaction. Stations and parameters
/// are kept.
///
/// # Errors
///
/// Returns [`DbError`] if any delete fails; nothing is deleted then.
pub fn delete_data_type(conn: &Connection, data_type: DataType) -> Result<(), DbError> {
    let tx = conn.unchecked_transaction()?;
    let code = data_type.as_ref();

    for granularity in Granularity::ALL {
        let (from, _, data_type_column) = fact_joins(granularity);
        tx.execute(
            &format!(
                "DELETE FROM measurements WHERE granularity = ? AND data_id IN (
                    SELECT fd.id FROM {from} WHERE {data_type_column} = ?)"
            ),
            duckdb::params![granularity.as_ref(), code],
        )?;
    }

    tx.execute(
        "DELETE FROM hour_data WHERE hour_id IN (
            SELECT h.id FROM hours h JOIN days d ON h.day_id = d.id WHERE d.data_type = ?)",
        [code],
    )?;
    tx.execute(
        "DELETE FROM day_data WHERE day_id IN (SELECT id FROM days WHERE data_type = ?)",
        [code],
    )?;
    tx.execute(
        "DELETE FROM week_data WHERE week_id IN (SELECT id FROM weeks WHERE data_type = ?)",
        [code],
    )?;
    tx.execute(
        "DELETE FROM month_data WHERE month_id IN (
            SELECT m.id FROM months m JOIN years y ON m.year_id = y.id WHERE y.data_type = ?)",
        [code],
    )?;
    tx.execute(
        "DELETE FROM year_data WHERE year_id IN (SELECT id FROM years WHERE data_type = ?)",
        [code],
    )?;
    tx.execute(
        "DELETE FROM hours WHERE day_id IN (SELECT id FROM days WHERE data_type = ?)",
        [code],
    )?;
    tx.execute("DELETE FROM days WHERE data_type = ?", [code])?;
    tx.execute(
        "DELETE FROM week_years WHERE week_id IN (SELECT id FROM weeks WHERE data_type = ?)",
        [code],
    )?;
    tx.execute("DELETE FROM weeks WHERE data_type = ?", [code])?;
    tx.execute(
        "DELETE FROM months WHERE year_id IN (SELECT id FROM years WHERE data_type = ?)",
        [code],
    )?;
    tx.execute("DELETE FROM years WHERE data_type = ?", [code])?;
    tx.execute("DELETE FROM import_states WHERE data_type = ?", [code])?;

    tx.commit()?;

    log::info!("{data_type}: removed all calendar and fact rows");

    Ok(())
}

/// Loads every station's stored month measurements for months
/// `first_month..=last_month` of a year, ordered by station and month.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn month_values(
    conn: &Connection,
    data_type: DataType,
    year_number: i32,
    first_month: u32,
    last_month: u32,
) -> Result<Vec<MonthValue>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT fd.station_id, m.month_number, p.id, p.name, ms.value
         FROM month_data fd
         JOIN months m ON fd.month_id = m.id
         JOIN years y ON m.year_id = y.id
         JOIN measurements ms ON ms.granularity = 'month' AND ms.data_id = fd.id
         JOIN parameters p ON ms.parameter_id = p.id
         WHERE y.data_type = ? AND y.year_number = ?
           AND m.month_number BETWEEN ? AND ?
         ORDER BY fd.station_id, m.month_number, p.name",
    )?;

    let rows = stmt.query_map(
        duckdb::params![
            data_type.as_ref(),
            year_number,
            i64::from(first_month),
            i64::from(last_month)
        ],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i32>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
            ))
        },
    )?;

    let mut values = Vec::new();
    for row in rows {
        let (station_id, month, parameter_id, parameter, value) = row?;
        values.push((
            station_id,
            number_from_db(month)?,
            parameter_id,
            parameter,
            value,
        ));
    }
    Ok(values)
}

/// Loads stored hourly measurements of a data type for dates in
/// `from..until` (end exclusive), ordered by time.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a stored date is invalid.
pub fn hour_values(
    conn: &Connection,
    data_type: DataType,
    from: NaiveDate,
    until: NaiveDate,
) -> Result<Vec<HourValue>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT CAST(d.day_date AS VARCHAR), h.hour_number, s.name, p.name, ms.value
         FROM hour_data fd
         JOIN hours h ON fd.hour_id = h.id
         JOIN days d ON h.day_id = d.id
         JOIN stations s ON fd.station_id = s.id
         JOIN measurements ms ON ms.granularity = 'hour' AND ms.data_id = fd.id
         JOIN parameters p ON ms.parameter_id = p.id
         WHERE d.data_type = ?
           AND d.day_date >= CAST(? AS DATE) AND d.day_date < CAST(? AS DATE)
         ORDER BY d.day_date, h.hour_number, s.name, p.name",
    )?;

    let rows = stmt.query_map(
        duckdb::params![
            data_type.as_ref(),
            from.format("%Y-%m-%d").to_string(),
            until.format("%Y-%m-%d").to_string()
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i32>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
            ))
        },
    )?;

    let mut values = Vec::new();
    for row in rows {
        let (date, hour, station, parameter, value) = row?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
            DbError::Conversion {
                message: format!("Invalid stored date {date:?}: {e}"),
            }
        })?;
        values.push((date, number_from_db(hour)?, station, parameter, value));
    }
    Ok(values)
}

/// Lists every stored measurement of a data type at one granularity,
/// labelled by bucket, ordered by bucket, station, and parameter.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn stored_measurements(
    conn: &Connection,
    data_type: DataType,
    granularity: Granularity,
) -> Result<Vec<StoredMeasurement>, DbError> {
    let (from, label, data_type_column) = fact_joins(granularity);
    let mut stmt = conn.prepare(&format!(
        "SELECT {label} AS bucket, s.name, p.name, ms.value
         FROM {from}
         JOIN stations s ON fd.station_id = s.id
         JOIN measurements ms ON ms.granularity = ? AND ms.data_id = fd.id
         JOIN parameters p ON ms.parameter_id = p.id
         WHERE {data_type_column} = ?
         ORDER BY bucket, s.name, p.name"
    ))?;

    let rows = stmt.query_map(
        duckdb::params![granularity.as_ref(), data_type.as_ref()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Counts fact rows of a data type at one granularity.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_fact_rows(
    conn: &Connection,
    data_type: DataType,
    granularity: Granularity,
) -> Result<u64, DbError> {
    let (from, _, data_type_column) = fact_joins(granularity);
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {from} WHERE {data_type_column} = ?"),
        [data_type.as_ref()],
        |row| row.get(0),
    )?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

/// Counts fact rows of a data type at one granularity that share a
/// `(station, bucket)` pair with another row. Always zero when the
/// uniqueness invariant holds.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count_duplicate_fact_rows(
    conn: &Connection,
    data_type: DataType,
    granularity: Granularity,
) -> Result<u64, DbError> {
    let (from, _, data_type_column) = fact_joins(granularity);
    let (_, bucket_column) = fact_table(granularity);
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(n - 1), 0) FROM (
                SELECT COUNT(*) AS n FROM {from}
                WHERE {data_type_column} = ?
                GROUP BY fd.station_id, fd.{bucket_column})"
        ),
        [data_type.as_ref()],
        |row| row.get(0),
    )?;
    #[allow(clippy::cast_sign_loss)]
    Ok(count as u64)
}

// ============================================================
// Import watermark
// ============================================================

/// Loads the import watermark of a data type, if one exists.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the stored month is invalid.
pub fn get_import_state(
    conn: &Connection,
    data_type: DataType,
) -> Result<Option<ImportState>, DbError> {
    let result = conn.query_row(
        "SELECT year_number, month_number FROM import_states WHERE data_type = ?",
        [data_type.as_ref()],
        |row| Ok((row.get::<_, i32>(0)?, row.get::<_, i32>(1)?)),
    );

    match result {
        Ok((year_number, month)) => Ok(Some(ImportState {
            data_type,
            year_number,
            month_number: number_from_db(month)?,
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Stores the import watermark of a data type.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_import_state(conn: &Connection, state: &ImportState) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO import_states (data_type, year_number, month_number) VALUES (?, ?, ?)
         ON CONFLICT (data_type) DO UPDATE SET
            year_number = EXCLUDED.year_number,
            month_number = EXCLUDED.month_number",
        duckdb::params![
            state.data_type.as_ref(),
            state.year_number,
            i64::from(state.month_number)
        ],
    )?;
    Ok(())
}
