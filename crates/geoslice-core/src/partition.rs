//! Calendar partitioning of a date range into sub-month intervals.
//!
//! Every calendar month is split into three consecutive parts. The first two
//! parts are `days_in_month / 3` days long and the third absorbs the
//! remainder, so a 31-day month yields `[1,10] [11,20] [21,31]`.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate};

/// Number of intervals emitted per calendar month
pub const PARTS_PER_MONTH: usize = 3;

/// Inclusive date range assigned to one retrieval task.
///
/// Ordering is chronological by `start`, which is also the merge order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateInterval {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateInterval {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Whether `date` falls inside this interval
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Split one calendar month into its three parts.
    ///
    /// Returns `None` for a month chrono cannot represent.
    pub fn month_thirds(year: i32, month: u32) -> Option<[DateInterval; PARTS_PER_MONTH]> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let last = next_month(first)?.pred_opt()?;
        let part = u64::from(last.day() / 3);

        let end1 = first.checked_add_days(Days::new(part - 1))?;
        let start2 = end1.succ_opt()?;
        let end2 = start2.checked_add_days(Days::new(part - 1))?;
        let start3 = end2.succ_opt()?;

        Some([
            Self::new(first, end1),
            Self::new(start2, end2),
            Self::new(start3, last),
        ])
    }

    /// Value of the STAC `datetime` search field (`start/end`)
    pub fn stac_datetime(&self) -> String {
        format!(
            "{}/{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    /// Artifact file name for this interval, keyed by start date
    pub fn artifact_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.start.format("%Y-%m-%d"))
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stac_datetime())
    }
}

/// Error building a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Start date lies after end date
    InvalidRange { start: NaiveDate, end: NaiveDate },
    /// Calendar arithmetic left chrono's supported range
    OutOfRange(String),
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange { start, end } => {
                write!(f, "invalid date range: {start} is after {end}")
            }
            Self::OutOfRange(what) => write!(f, "date out of range: {what}"),
        }
    }
}

impl std::error::Error for PartitionError {}

/// First day of the month following `date`
fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

/// Partition `[start, end]` into month thirds.
///
/// The cursor starts on the first day of `start`'s month. Every month whose
/// first day is `<= end` is emitted whole, so an `end` in the middle of a
/// month still covers that entire month.
pub fn partition(start: NaiveDate, end: NaiveDate) -> Result<Vec<DateInterval>, PartitionError> {
    if start > end {
        return Err(PartitionError::InvalidRange { start, end });
    }

    let mut cursor = start
        .with_day(1)
        .ok_or_else(|| PartitionError::OutOfRange(start.to_string()))?;
    let mut intervals = Vec::new();

    while cursor <= end {
        let parts = DateInterval::month_thirds(cursor.year(), cursor.month())
            .ok_or_else(|| PartitionError::OutOfRange(cursor.to_string()))?;
        intervals.extend(parts);
        cursor = next_month(cursor).ok_or_else(|| PartitionError::OutOfRange(cursor.to_string()))?;
    }

    log::debug!(
        "Partitioned {start}..{end} into {} intervals",
        intervals.len()
    );
    Ok(intervals)
}

/// Partition whole calendar years, January 1 of `start_year` through
/// December 31 of `end_year`.
pub fn partition_years(start_year: i32, end_year: i32) -> Result<Vec<DateInterval>, PartitionError> {
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .ok_or_else(|| PartitionError::OutOfRange(format!("year {start_year}")))?;
    let end = NaiveDate::from_ymd_opt(end_year, 12, 31)
        .ok_or_else(|| PartitionError::OutOfRange(format!("year {end_year}")))?;
    partition(start, end)
}
