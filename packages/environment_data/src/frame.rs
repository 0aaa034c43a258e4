//! Time-indexed measurement tables.
//!
//! A [`MeasurementFrame`] is a dense table: one row per timestamp in
//! ascending order, one column per `(station, parameter)` pair. Missing
//! values are `NaN`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use civic_map_environment_data_models::ColumnKey;

use crate::EnvironmentDataError;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// A time-indexed table of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementFrame {
    columns: Vec<ColumnKey>,
    index: Vec<NaiveDateTime>,
    rows: Vec<Vec<f64>>,
}

impl MeasurementFrame {
    /// Builds a frame from rows, sorting them by timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError::InvalidFrame`] if a row's width
    /// differs from the number of columns, a column is repeated, or a
    /// timestamp appears twice.
    pub fn from_rows(
        columns: Vec<ColumnKey>,
        mut rows: Vec<(NaiveDateTime, Vec<f64>)>,
    ) -> Result<Self, EnvironmentDataError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column) {
                return Err(EnvironmentDataError::InvalidFrame {
                    message: format!("duplicate column {:?}", column.header()),
                });
            }
        }

        if let Some((timestamp, row)) = rows.iter().find(|(_, row)| row.len() != columns.len()) {
            return Err(EnvironmentDataError::InvalidFrame {
                message: format!(
                    "row {timestamp} has {} values for {} columns",
                    row.len(),
                    columns.len()
                ),
            });
        }

        rows.sort_by_key(|(timestamp, _)| *timestamp);
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(EnvironmentDataError::InvalidFrame {
                message: format!("duplicate timestamp {}", pair[0].0),
            });
        }

        let (index, rows) = rows.into_iter().unzip();
        Ok(Self {
            columns,
            index,
            rows,
        })
    }

    /// Builds a frame from individual `(timestamp, column, value)`
    /// observations. Columns appear in first-seen order; cells without an
    /// observation are `NaN`. A repeated observation overwrites the
    /// earlier one.
    #[must_use]
    pub fn from_observations(
        observations: impl IntoIterator<Item = (NaiveDateTime, ColumnKey, f64)>,
    ) -> Self {
        let mut columns: Vec<ColumnKey> = Vec::new();
        let mut positions: HashMap<ColumnKey, usize> = HashMap::new();
        let mut cells: BTreeMap<NaiveDateTime, Vec<(usize, f64)>> = BTreeMap::new();

        for (timestamp, column, value) in observations {
            let position = *positions.entry(column.clone()).or_insert_with(|| {
                columns.push(column);
                columns.len() - 1
            });
            cells.entry(timestamp).or_default().push((position, value));
        }

        let width = columns.len();
        let (index, rows) = cells
            .into_iter()
            .map(|(timestamp, values)| {
                let mut row = vec![f64::NAN; width];
                for (position, value) in values {
                    row[position] = value;
                }
                (timestamp, row)
            })
            .unzip();

        Self {
            columns,
            index,
            rows,
        }
    }

    /// Reads a frame from CSV.
    ///
    /// The first column holds timestamps; every other header must be a
    /// `"{station} {parameter}"` column name. Empty cells and `NaN` are
    /// missing values.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError`] if the CSV is unreadable, a header
    /// or timestamp cannot be parsed, a value is not numeric, or the rows
    /// do not form a valid frame.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, EnvironmentDataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(EnvironmentDataError::InvalidFrame {
                message: "expected a timestamp column and at least one measurement column"
                    .to_string(),
            });
        }

        let columns = headers
            .iter()
            .skip(1)
            .map(|header| {
                ColumnKey::parse(header).ok_or_else(|| EnvironmentDataError::InvalidFrame {
                    message: format!("column {header:?} is not \"<station> <parameter>\""),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let raw_timestamp = fields.next().unwrap_or("");
            let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
                EnvironmentDataError::InvalidFrame {
                    message: format!("row {}: invalid timestamp {raw_timestamp:?}", line + 1),
                }
            })?;

            let values = fields
                .zip(&columns)
                .map(|(cell, column)| {
                    parse_value(cell).ok_or_else(|| EnvironmentDataError::InvalidFrame {
                        message: format!(
                            "row {}: invalid value {cell:?} for {}",
                            line + 1,
                            column.header()
                        ),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push((timestamp, values));
        }

        let frame = Self::from_rows(columns, rows)?;
        log::debug!(
            "Read {} row(s) x {} column(s)",
            frame.len(),
            frame.columns.len()
        );
        Ok(frame)
    }

    /// Reads a frame from a CSV file. See [`Self::from_csv_reader`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentDataError`] if the file cannot be opened or
    /// parsed.
    pub fn from_csv_path(path: &Path) -> Result<Self, EnvironmentDataError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Column keys, in column order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    /// Rows as `(timestamp, values)`, ascending by timestamp.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDateTime, &[f64])> {
        self.index
            .iter()
            .copied()
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// First timestamp.
    #[must_use]
    pub fn first(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    /// Last timestamp.
    #[must_use]
    pub fn last(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    /// Returns this frame with `earlier`'s rows added in front of it.
    ///
    /// Columns are the union of both frames (this frame's first). Rows of
    /// `earlier` at timestamps this frame already has are discarded.
    #[must_use]
    pub fn with_earlier(self, earlier: Self) -> Self {
        let mut columns = self.columns.clone();
        for column in &earlier.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let width = columns.len();

        let remap = |frame: &Self| -> Vec<usize> {
            frame
                .columns
                .iter()
                .map(|c| columns.iter().position(|x| x == c).unwrap_or(0))
                .collect()
        };
        let own_map = remap(&self);
        let earlier_map = remap(&earlier);

        let mut merged: BTreeMap<NaiveDateTime, Vec<f64>> = BTreeMap::new();
        for (frame, map) in [(&earlier, &earlier_map), (&self, &own_map)] {
            for (timestamp, values) in frame.rows() {
                let mut row = vec![f64::NAN; width];
                for (value, position) in values.iter().zip(map) {
                    row[*position] = *value;
                }
                merged.insert(timestamp, row);
            }
        }

        let (index, rows) = merged.into_iter().unzip();
        Self {
            columns,
            index,
            rows,
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches('Z');
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    raw.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn key(station: &str, parameter: &str) -> ColumnKey {
        ColumnKey {
            station: station.to_string(),
            parameter: parameter.to_string(),
        }
    }

    #[test]
    fn reads_csv_with_missing_values_and_sorts_rows() {
        let csv = "time,Turku Kauppatori PM10_PT1H_avg,Ruissalo O3_PT1H_avg\n\
                   2021-12-01T01:00:00Z,3.5,NaN\n\
                   2021-12-01T00:00:00Z,2.0,\n\
                   2021-12-01 02:00:00,,40\n";

        let frame = MeasurementFrame::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.columns()[0], key("Turku Kauppatori", "PM10_PT1H_avg"));
        assert_eq!(frame.first(), Some(ts("2021-12-01 00:00")));
        assert_eq!(frame.last(), Some(ts("2021-12-01 02:00")));

        let rows: Vec<_> = frame.rows().collect();
        assert!((rows[0].1[0] - 2.0).abs() < f64::EPSILON);
        assert!(rows[0].1[1].is_nan());
        assert!(rows[2].1[0].is_nan());
        assert!((rows[2].1[1] - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_headers_and_values() {
        let bad_header = "time,nospace\n2021-12-01T00:00:00,1\n";
        assert!(MeasurementFrame::from_csv_reader(bad_header.as_bytes()).is_err());

        let bad_value = "time,A TA_PT1H_AVG\n2021-12-01T00:00:00,warm\n";
        assert!(MeasurementFrame::from_csv_reader(bad_value.as_bytes()).is_err());

        let bad_time = "time,A TA_PT1H_AVG\nyesterday,1\n";
        assert!(MeasurementFrame::from_csv_reader(bad_time.as_bytes()).is_err());

        let duplicate = "time,A TA_PT1H_AVG\n2021-12-01T00:00:00,1\n2021-12-01T00:00:00,2\n";
        assert!(MeasurementFrame::from_csv_reader(duplicate.as_bytes()).is_err());
    }

    #[test]
    fn builds_from_observations() {
        let frame = MeasurementFrame::from_observations([
            (ts("2021-11-30 01:00"), key("A", "TA_PT1H_AVG"), 1.0),
            (ts("2021-11-29 00:00"), key("B", "TA_PT1H_AVG"), 2.0),
            (ts("2021-11-30 01:00"), key("B", "TA_PT1H_AVG"), 3.0),
        ]);

        assert_eq!(frame.columns(), &[key("A", "TA_PT1H_AVG"), key("B", "TA_PT1H_AVG")]);
        let rows: Vec<_> = frame.rows().collect();
        assert_eq!(rows[0].0, ts("2021-11-29 00:00"));
        assert_eq!(rows[1].0, ts("2021-11-30 01:00"));
        assert!(rows[0].1[0].is_nan());
        assert!((rows[1].1[1] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn prepends_earlier_rows_with_column_union() {
        let later = MeasurementFrame::from_rows(
            vec![key("A", "TA_PT1H_AVG")],
            vec![(ts("2021-12-01 00:00"), vec![5.0])],
        )
        .unwrap();
        let earlier = MeasurementFrame::from_observations([
            (ts("2021-11-29 00:00"), key("B", "TA_PT1H_AVG"), 1.0),
            (ts("2021-11-30 00:00"), key("A", "TA_PT1H_AVG"), 2.0),
        ]);

        let combined = later.with_earlier(earlier);

        assert_eq!(combined.columns(), &[key("A", "TA_PT1H_AVG"), key("B", "TA_PT1H_AVG")]);
        assert_eq!(combined.len(), 3);
        let rows: Vec<_> = combined.rows().collect();
        assert!(rows[0].1[0].is_nan());
        assert!((rows[0].1[1] - 1.0).abs() < f64::EPSILON);
        assert!((rows[1].1[0] - 2.0).abs() < f64::EPSILON);
        assert!((rows[2].1[0] - 5.0).abs() < f64::EPSILON);
    }
}
