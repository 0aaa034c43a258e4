//! Run-scoped resolution of calendar and dimension rows.
//!
//! A [`CalendarCache`] memoizes natural key to row id lookups for one
//! import run and is dropped with it. After the run deletes months, it
//! must call [`CalendarCache::forget_months`] so no cached id points at
//! a deleted row.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use civic_map_database::environment_db::{self, DayParents};
use civic_map_environment_data_models::{BucketKey, DataType};
use duckdb::Connection;

use crate::EnvironmentDataError;

/// Memoized calendar, station, and parameter ids for one data type.
#[derive(Debug)]
pub struct CalendarCache {
    data_type: DataType,
    years: HashMap<i32, i64>,
    months: HashMap<(i32, u32), i64>,
    weeks: HashMap<(i32, u32), i64>,
    week_years: HashSet<(i64, i64)>,
    days: HashMap<NaiveDate, i64>,
    hours: HashMap<(NaiveDate, u32), i64>,
    stations: HashMap<String, i64>,
    parameters: HashMap<String, i64>,
}

impl CalendarCache {
    /// Creates an empty cache for `data_type`.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            years: HashMap::new(),
            months: HashMap::new(),
            weeks: HashMap::new(),
            week_years: HashSet::new(),
            days: HashMap::new(),
            hours: HashMap::new(),
            stations: HashMap::new(),
            parameters: HashMap::new(),
        }
    }

    /// The data type this cache resolves rows for.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Drops cached months, days, and hours. Call after deleting months.
    pub fn forget_months(&mut self) {
        self.months.clear();
        self.days.clear();
        self.hours.clear();
    }

    /// Number of cached calendar ids across all granularities.
    #[must_use]
    pub fn cached_calendar_ids(&self) -> usize {
        self.years.len()
            + self.months.len()
            + self.weeks.len()
            + self.days.len()
            + self.hours.len()
    }

    /// Resolves a year row.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if the lookup fails.
    pub fn year(&mut self, conn: &Connection, year: i32) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.years.get(&year) {
            return Ok(*id);
        }
        let id = environment_db::get_or_create_year(conn, self.data_type, year)?;
        self.years.insert(year, id);
        Ok(id)
    }

    /// Resolves a month row.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if the lookup fails.
    pub fn month(
        &mut self,
        conn: &Connection,
        year: i32,
        month: u32,
    ) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.months.get(&(year, month)) {
            return Ok(*id);
        }
        let year_id = self.year(conn, year)?;
        let id = environment_db::get_or_create_month(conn, year_id, month)?;
        self.months.insert((year, month), id);
        Ok(id)
    }

    /// Resolves an ISO week row.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if the lookup fails.
    pub fn week(
        &mut self,
        conn: &Connection,
        iso_year: i32,
        week: u32,
    ) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.weeks.get(&(iso_year, week)) {
            return Ok(*id);
        }
        let id = environment_db::get_or_create_week(conn, self.data_type, iso_year, week)?;
        self.weeks.insert((iso_year, week), id);
        Ok(id)
    }

    /// Resolves the week containing `date` and makes sure the week lists
    /// `date`'s calendar year among its years.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if a lookup fails.
    pub fn week_of(
        &mut self,
        conn: &Connection,
        date: NaiveDate,
    ) -> Result<i64, EnvironmentDataError> {
        let iso = date.iso_week();
        let week_id = self.week(conn, iso.year(), iso.week())?;
        let year_id = self.year(conn, date.year())?;
        if self.week_years.insert((week_id, year_id)) {
            environment_db::add_week_year(conn, week_id, year_id)?;
        }
        Ok(week_id)
    }

    /// Resolves a day row, creating its year, month, and week as needed.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if a lookup fails.
    pub fn day(&mut self, conn: &Connection, date: NaiveDate) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.days.get(&date) {
            return Ok(*id);
        }
        let parents = DayParents {
            year_id: self.year(conn, date.year())?,
            month_id: self.month(conn, date.year(), date.month())?,
            week_id: self.week_of(conn, date)?,
        };
        let weekday = date.weekday().num_days_from_monday();
        let id = environment_db::get_or_create_day(conn, self.data_type, date, weekday, parents)?;
        self.days.insert(date, id);
        Ok(id)
    }

    /// Resolves an hour row, creating its day as needed.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if a lookup fails.
    pub fn hour(
        &mut self,
        conn: &Connection,
        date: NaiveDate,
        hour: u32,
    ) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.hours.get(&(date, hour)) {
            return Ok(*id);
        }
        let day_id = self.day(conn, date)?;
        let id = environment_db::get_or_create_hour(conn, day_id, hour)?;
        self.hours.insert((date, hour), id);
        Ok(id)
    }

    /// Resolves the row for any bucket key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if a lookup fails.
    pub fn bucket(
        &mut self,
        conn: &Connection,
        key: BucketKey,
    ) -> Result<i64, EnvironmentDataError> {
        match key {
            BucketKey::Year { year } => self.year(conn, year),
            BucketKey::Month { year, month } => self.month(conn, year, month),
            BucketKey::Week { iso_year, week } => self.week(conn, iso_year, week),
            BucketKey::Day { date } => self.day(conn, date),
            BucketKey::Hour { date, hour } => self.hour(conn, date, hour),
        }
    }

    /// Resolves a station row.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if the lookup fails.
    pub fn station(&mut self, conn: &Connection, name: &str) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.stations.get(name) {
            return Ok(*id);
        }
        let id = environment_db::get_or_create_station(conn, self.data_type, name)?;
        self.stations.insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolves a parameter row.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::Database`] if the lookup fails.
    pub fn parameter(
        &mut self,
        conn: &Connection,
        name: &str,
    ) -> Result<i64, EnvironmentDataError> {
        if let Some(id) = self.parameters.get(name) {
            return Ok(*id);
        }
        let id = environment_db::get_or_create_parameter(conn, self.data_type, name)?;
        self.parameters.insert(name.to_string(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        environment_db::create_schema(&conn).unwrap();
        conn
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn straddling_week_gains_both_years() {
        let conn = memory_db();
        let mut cache = CalendarCache::new(DataType::AirQuality);

        let dec = cache.day(&conn, date("2021-12-31")).unwrap();
        let jan = cache.day(&conn, date("2022-01-02")).unwrap();
        assert_ne!(dec, jan);

        let week = cache.week(&conn, 2021, 52).unwrap();
        assert_eq!(
            environment_db::week_year_numbers(&conn, week).unwrap(),
            vec![2021, 2022]
        );
        assert_eq!(
            environment_db::list_years(&conn, DataType::AirQuality).unwrap(),
            vec![2021, 2022]
        );
    }

    #[test]
    fn a_fresh_cache_resolves_the_same_rows() {
        let conn = memory_db();
        let mut first = CalendarCache::new(DataType::WeatherObservation);
        let hour = first.hour(&conn, date("2022-01-01"), 5).unwrap();
        let station = first.station(&conn, "Artukainen").unwrap();

        let mut second = CalendarCache::new(DataType::WeatherObservation);
        assert_eq!(second.hour(&conn, date("2022-01-01"), 5).unwrap(), hour);
        assert_eq!(second.station(&conn, "Artukainen").unwrap(), station);
    }

    #[test]
    fn forgetting_months_recreates_deleted_rows() {
        let conn = memory_db();
        let dt = DataType::AirQuality;
        let mut cache = CalendarCache::new(dt);
        let before = cache.day(&conn, date("2021-12-01")).unwrap();

        environment_db::delete_months(&conn, dt, 2021, 12, 12).unwrap();
        cache.forget_months();

        let after = cache.day(&conn, date("2021-12-01")).unwrap();
        assert_ne!(before, after);
        let month = cache.month(&conn, 2021, 12).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM months WHERE id = ?", [month], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
