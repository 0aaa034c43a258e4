//! Reduction of a measurement frame to calendar buckets.

use std::collections::BTreeMap;

use civic_map_environment_data_models::{BucketKey, DataTypeDefinition, Granularity};

use crate::frame::MeasurementFrame;

/// One bucket's reduced values, aligned with the frame's columns.
/// `None` means every sample in the bucket was missing.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBucket {
    /// The calendar bucket.
    pub key: BucketKey,
    /// One value per frame column.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: f64,
}

/// Groups `frame`'s rows by their bucket at `granularity` and reduces
/// each column per bucket.
///
/// Missing values are skipped. Parameters the definition marks
/// cumulative are summed; all others are averaged. Buckets are returned
/// in time order.
#[must_use]
pub fn aggregate(
    frame: &MeasurementFrame,
    granularity: Granularity,
    definition: &DataTypeDefinition,
) -> Vec<AggregatedBucket> {
    let width = frame.columns().len();
    let cumulative: Vec<bool> = frame
        .columns()
        .iter()
        .map(|column| definition.is_cumulative(&column.parameter))
        .collect();

    let mut buckets: BTreeMap<BucketKey, Vec<Accumulator>> = BTreeMap::new();
    for (timestamp, values) in frame.rows() {
        let accumulators = buckets
            .entry(BucketKey::of(granularity, timestamp))
            .or_insert_with(|| vec![Accumulator::default(); width]);
        for (accumulator, value) in accumulators.iter_mut().zip(values) {
            if !value.is_nan() {
                accumulator.sum += value;
                accumulator.count += 1.0;
            }
        }
    }

    log::debug!(
        "Aggregated {} row(s) into {} {granularity} bucket(s)",
        frame.len(),
        buckets.len()
    );

    buckets
        .into_iter()
        .map(|(key, accumulators)| AggregatedBucket {
            key,
            values: accumulators
                .iter()
                .zip(&cumulative)
                .map(|(a, &is_cumulative)| reduce(a, is_cumulative))
                .collect(),
        })
        .collect()
}

fn reduce(accumulator: &Accumulator, cumulative: bool) -> Option<f64> {
    if accumulator.count < 1.0 {
        None
    } else if cumulative {
        Some(accumulator.sum)
    } else {
        Some(accumulator.sum / accumulator.count)
    }
}

/// Reduces a list of values with the same rule as [`aggregate`]: sum if
/// cumulative, mean otherwise, `NaN`s skipped.
#[must_use]
pub fn reduce_values(values: &[f64], cumulative: bool) -> Option<f64> {
    let accumulator = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(Accumulator::default(), |mut a, v| {
            a.sum += v;
            a.count += 1.0;
            a
        });
    reduce(&accumulator, cumulative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::data_type_definition;
    use chrono::NaiveDateTime;
    use civic_map_environment_data_models::{ColumnKey, DataType};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn weather_frame(rows: Vec<(NaiveDateTime, Vec<f64>)>) -> MeasurementFrame {
        MeasurementFrame::from_rows(
            vec![
                ColumnKey::parse("Artukainen TA_PT1H_AVG").unwrap(),
                ColumnKey::parse("Artukainen PRA_PT1H_ACC").unwrap(),
            ],
            rows,
        )
        .unwrap()
    }

    #[test]
    fn cumulative_parameters_sum_and_others_average() {
        let definition = data_type_definition(DataType::WeatherObservation).unwrap();
        let v = 1.5;
        let hours: u32 = 24;
        let start = ts("2021-12-01 00:00");
        let frame = weather_frame(
            (0..hours)
                .map(|h| (start + chrono::Duration::hours(i64::from(h)), vec![v, v]))
                .collect(),
        );

        let days = aggregate(&frame, Granularity::Day, &definition);

        assert_eq!(days.len(), 1);
        let mean = days[0].values[0].unwrap();
        let sum = days[0].values[1].unwrap();
        assert!((mean - v).abs() < 1e-12);
        assert!((sum - v * f64::from(hours)).abs() < 1e-12);
    }

    #[test]
    fn missing_values_are_dropped_before_reduction() {
        let definition = data_type_definition(DataType::WeatherObservation).unwrap();
        let frame = weather_frame(vec![
            (ts("2021-12-01 00:00"), vec![2.0, f64::NAN]),
            (ts("2021-12-01 01:00"), vec![f64::NAN, f64::NAN]),
            (ts("2021-12-01 02:00"), vec![4.0, f64::NAN]),
        ]);

        let days = aggregate(&frame, Granularity::Day, &definition);

        assert_eq!(days[0].values[0], Some(3.0));
        assert_eq!(days[0].values[1], None);
    }

    #[test]
    fn buckets_come_out_in_time_order() {
        let definition = data_type_definition(DataType::WeatherObservation).unwrap();
        let frame = weather_frame(vec![
            (ts("2022-01-01 00:00"), vec![1.0, 1.0]),
            (ts("2021-12-31 23:00"), vec![2.0, 2.0]),
            (ts("2022-01-03 00:00"), vec![3.0, 3.0]),
        ]);

        let weeks = aggregate(&frame, Granularity::Week, &definition);
        let labels: Vec<String> = weeks.iter().map(|b| b.key.label()).collect();
        assert_eq!(labels, vec!["2021-W52", "2022-W01"]);
        assert_eq!(weeks[0].values[0], Some(1.5));
        assert_eq!(weeks[0].values[1], Some(3.0));

        let months = aggregate(&frame, Granularity::Month, &definition);
        let labels: Vec<String> = months.iter().map(|b| b.key.label()).collect();
        assert_eq!(labels, vec!["2021-12", "2022-01"]);
    }

    #[test]
    fn reduces_plain_value_lists() {
        assert_eq!(reduce_values(&[1.0, 2.0, f64::NAN, 3.0], false), Some(2.0));
        assert_eq!(reduce_values(&[1.0, 2.0, f64::NAN, 3.0], true), Some(6.0));
        assert_eq!(reduce_values(&[f64::NAN], false), None);
        assert_eq!(reduce_values(&[], true), None);
    }
}
