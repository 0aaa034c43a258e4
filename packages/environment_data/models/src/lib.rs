#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Environment data types.
//!
//! Data types and their parameter definitions (deserialized from the
//! embedded TOML registry), calendar bucket keys, measurement column
//! names, and the import watermark that incremental imports resume from.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A family of environmental measurements imported together.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum DataType {
    /// Air quality station observations.
    #[serde(rename = "AQ")]
    #[strum(serialize = "AQ")]
    AirQuality,
    /// Weather station observations.
    #[serde(rename = "WO")]
    #[strum(serialize = "WO")]
    WeatherObservation,
}

/// Calendar aggregation granularity, coarsest first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Granularity {
    /// Calendar year.
    Year,
    /// Calendar month.
    Month,
    /// ISO week.
    Week,
    /// Calendar day.
    Day,
    /// Hour of day.
    Hour,
}

impl Granularity {
    /// Every granularity, coarsest first.
    pub const ALL: [Self; 5] = [Self::Year, Self::Month, Self::Week, Self::Day, Self::Hour];
}

/// The calendar bucket a timestamp falls into at some granularity.
///
/// Ordering follows time within a granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    /// A calendar year.
    Year {
        /// Year number.
        year: i32,
    },
    /// A calendar month.
    Month {
        /// Year number.
        year: i32,
        /// Month number, 1-12.
        month: u32,
    },
    /// An ISO 8601 week.
    Week {
        /// ISO week-numbering year (may differ from the calendar year).
        iso_year: i32,
        /// ISO week number, 1-53.
        week: u32,
    },
    /// A calendar day.
    Day {
        /// The date.
        date: NaiveDate,
    },
    /// One hour of a day.
    Hour {
        /// The date.
        date: NaiveDate,
        /// Hour of day, 0-23.
        hour: u32,
    },
}

impl BucketKey {
    /// Returns the bucket containing `timestamp` at `granularity`.
    #[must_use]
    pub fn of(granularity: Granularity, timestamp: NaiveDateTime) -> Self {
        let date = timestamp.date();
        match granularity {
            Granularity::Year => Self::Year { year: date.year() },
            Granularity::Month => Self::Month {
                year: date.year(),
                month: date.month(),
            },
            Granularity::Week => {
                let iso = date.iso_week();
                Self::Week {
                    iso_year: iso.year(),
                    week: iso.week(),
                }
            }
            Granularity::Day => Self::Day { date },
            Granularity::Hour => Self::Hour {
                date,
                hour: timestamp.hour(),
            },
        }
    }

    /// Human-readable label, matching the labels the database reports.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Year { year } => format!("{year}"),
            Self::Month { year, month } => format!("{year:04}-{month:02}"),
            Self::Week { iso_year, week } => format!("{iso_year:04}-W{week:02}"),
            Self::Day { date } => date.format("%Y-%m-%d").to_string(),
            Self::Hour { date, hour } => format!("{} {hour:02}:00", date.format("%Y-%m-%d")),
        }
    }
}

/// A measurement column name of the form `"{station} {parameter}"`.
///
/// Station names may contain spaces; the parameter is everything after
/// the last space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnKey {
    /// Station name.
    pub station: String,
    /// Parameter code (e.g. `"PM10_PT1H_avg"`).
    pub parameter: String,
}

impl ColumnKey {
    /// Parses a column header. Returns `None` if either part is empty.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let (station, parameter) = header.trim().rsplit_once(' ')?;
        let station = station.trim();
        if station.is_empty() || parameter.is_empty() {
            return None;
        }
        Some(Self {
            station: station.to_string(),
            parameter: parameter.to_string(),
        })
    }

    /// Renders the column header.
    #[must_use]
    pub fn header(&self) -> String {
        format!("{} {}", self.station, self.parameter)
    }
}

/// The persisted incremental-import watermark for one data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportState {
    /// Data type this watermark belongs to.
    pub data_type: DataType,
    /// Year of the last imported period.
    pub year_number: i32,
    /// Month of the last imported period, 1-12.
    pub month_number: u32,
}

impl ImportState {
    /// First instant of the watermark month: where the next fetch starts.
    ///
    /// Returns `None` if the stored month is out of range.
    #[must_use]
    pub fn resume_start(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year_number, self.month_number, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// The `(year, month)` immediately after the watermark month.
    #[must_use]
    pub const fn next_month(&self) -> (i32, u32) {
        if self.month_number >= 12 {
            (self.year_number + 1, 1)
        } else {
            (self.year_number, self.month_number + 1)
        }
    }
}

/// How a single import run reconciles stored aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    /// Everything for the data type was wiped; the whole frame is saved.
    Initial,
    /// The frame lies within one calendar year.
    IncrementalSameYear,
    /// The frame crosses from one calendar year into the next.
    IncrementalYearRollover,
}

impl ImportMode {
    /// Chooses the mode for a frame spanning `first..=last`.
    #[must_use]
    pub fn detect(initial_import: bool, first: NaiveDateTime, last: NaiveDateTime) -> Self {
        if initial_import {
            Self::Initial
        } else if last.year() > first.year() {
            Self::IncrementalYearRollover
        } else {
            Self::IncrementalSameYear
        }
    }
}

/// A parameter measured under a data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Parameter code as it appears in column headers.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether bucket values are sums of sub-period values instead of
    /// means (e.g. precipitation amount).
    #[serde(default)]
    pub cumulative: bool,
}

/// A data type and its known parameters, deserialized from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeDefinition {
    /// The data type.
    pub code: DataType,
    /// Human-readable name.
    pub name: String,
    /// Known parameters.
    pub parameters: Vec<ParameterDefinition>,
}

impl DataTypeDefinition {
    /// Whether `parameter` is one of this data type's cumulative
    /// parameters. Unknown parameters are never cumulative.
    #[must_use]
    pub fn is_cumulative(&self, parameter: &str) -> bool {
        self.parameters
            .iter()
            .any(|p| p.cumulative && p.name == parameter)
    }

    /// Whether `parameter` is a known parameter of this data type.
    #[must_use]
    pub fn knows(&self, parameter: &str) -> bool {
        self.parameters.iter().any(|p| p.name == parameter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn data_type_codes_round_trip() {
        assert_eq!(DataType::from_str("AQ").unwrap(), DataType::AirQuality);
        assert_eq!(DataType::WeatherObservation.as_ref(), "WO");
        assert!(DataType::from_str("XX").is_err());
    }

    #[test]
    fn buckets_timestamp_at_each_granularity() {
        let t = ts("2021-12-31 23:00");
        assert_eq!(BucketKey::of(Granularity::Year, t), BucketKey::Year { year: 2021 });
        assert_eq!(
            BucketKey::of(Granularity::Month, t),
            BucketKey::Month {
                year: 2021,
                month: 12
            }
        );
        assert_eq!(
            BucketKey::of(Granularity::Week, t),
            BucketKey::Week {
                iso_year: 2021,
                week: 52
            }
        );
        assert_eq!(BucketKey::of(Granularity::Hour, t).label(), "2021-12-31 23:00");
    }

    #[test]
    fn new_years_day_can_belong_to_previous_iso_year() {
        let key = BucketKey::of(Granularity::Week, ts("2022-01-01 12:00"));
        assert_eq!(
            key,
            BucketKey::Week {
                iso_year: 2021,
                week: 52
            }
        );
        assert_eq!(key.label(), "2021-W52");
    }

    #[test]
    fn parses_column_headers_with_spaces_in_station_names() {
        let key = ColumnKey::parse("Turku Kauppatori PM10_PT1H_avg").unwrap();
        assert_eq!(key.station, "Turku Kauppatori");
        assert_eq!(key.parameter, "PM10_PT1H_avg");
        assert_eq!(key.header(), "Turku Kauppatori PM10_PT1H_avg");

        assert!(ColumnKey::parse("nospace").is_none());
        assert!(ColumnKey::parse(" TA_PT1H_AVG").is_none());
    }

    #[test]
    fn watermark_resumes_at_month_start() {
        let state = ImportState {
            data_type: DataType::AirQuality,
            year_number: 2021,
            month_number: 12,
        };
        assert_eq!(state.resume_start(), Some(ts("2021-12-01 00:00")));
        assert_eq!(state.next_month(), (2022, 1));
    }

    #[test]
    fn detects_import_mode() {
        let dec = ts("2021-12-01 00:00");
        let jan = ts("2022-01-15 00:00");
        assert_eq!(ImportMode::detect(true, dec, jan), ImportMode::Initial);
        assert_eq!(
            ImportMode::detect(false, dec, jan),
            ImportMode::IncrementalYearRollover
        );
        assert_eq!(
            ImportMode::detect(false, dec, ts("2021-12-20 00:00")),
            ImportMode::IncrementalSameYear
        );
    }
}
