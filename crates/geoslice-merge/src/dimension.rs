//! Time-dimension inspection over Arrow columns.
//!
//! Values are compared in the column's native unit; every input shares the
//! first input's schema, so units never mix.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use chrono::{DateTime, NaiveDate};

/// Days from 0001-01-01 (CE) to 1970-01-01
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Inclusive value range of a dimension column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub min: i64,
    pub max: i64,
}

/// Adjacent pair breaking the strictly increasing order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Unordered {
    pub before: i64,
    pub after: i64,
}

pub(crate) fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32
            | DataType::Int64
            | DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
    )
}

fn bounds_of(mut values: impl Iterator<Item = i64>) -> Result<Option<Bounds>, Unordered> {
    let Some(first) = values.next() else {
        return Ok(None);
    };
    let mut last = first;
    for value in values {
        if value <= last {
            return Err(Unordered {
                before: last,
                after: value,
            });
        }
        last = value;
    }
    Ok(Some(Bounds {
        min: first,
        max: last,
    }))
}

/// Bounds of a null-free column whose values must strictly increase.
///
/// `Ok(None)` for empty or unsupported columns.
pub(crate) fn column_bounds(column: &dyn Array) -> Result<Option<Bounds>, Unordered> {
    match column.data_type() {
        DataType::Int32 => bounds_of(
            column
                .as_primitive::<Int32Type>()
                .values()
                .iter()
                .map(|&v| i64::from(v)),
        ),
        DataType::Date32 => bounds_of(
            column
                .as_primitive::<Date32Type>()
                .values()
                .iter()
                .map(|&v| i64::from(v)),
        ),
        DataType::Int64 => bounds_of(column.as_primitive::<Int64Type>().values().iter().copied()),
        DataType::Date64 => {
            bounds_of(column.as_primitive::<Date64Type>().values().iter().copied())
        }
        DataType::Timestamp(TimeUnit::Second, _) => bounds_of(
            column
                .as_primitive::<TimestampSecondType>()
                .values()
                .iter()
                .copied(),
        ),
        DataType::Timestamp(TimeUnit::Millisecond, _) => bounds_of(
            column
                .as_primitive::<TimestampMillisecondType>()
                .values()
                .iter()
                .copied(),
        ),
        DataType::Timestamp(TimeUnit::Microsecond, _) => bounds_of(
            column
                .as_primitive::<TimestampMicrosecondType>()
                .values()
                .iter()
                .copied(),
        ),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => bounds_of(
            column
                .as_primitive::<TimestampNanosecondType>()
                .values()
                .iter()
                .copied(),
        ),
        _ => Ok(None),
    }
}

/// Human-readable form of a native dimension value, for error messages
pub(crate) fn render(value: i64, data_type: &DataType) -> String {
    let rendered = match data_type {
        DataType::Date32 => i32::try_from(value)
            .ok()
            .and_then(|days| days.checked_add(EPOCH_DAYS_FROM_CE))
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| d.to_string()),
        DataType::Date64 | DataType::Timestamp(TimeUnit::Millisecond, _) => {
            DateTime::from_timestamp_millis(value).map(|t| t.naive_utc().to_string())
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            DateTime::from_timestamp(value, 0).map(|t| t.naive_utc().to_string())
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            DateTime::from_timestamp_micros(value).map(|t| t.naive_utc().to_string())
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            Some(DateTime::from_timestamp_nanos(value).naive_utc().to_string())
        }
        _ => None,
    };
    rendered.unwrap_or_else(|| value.to_string())
}
