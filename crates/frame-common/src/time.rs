//! Forecast run identifiers and the hourly time dimension they define.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, FrameResult};

/// A forecast run parsed from an identifier such as `2025-07-28T00Z_PT48H`.
///
/// The timeline has `duration_hours + 1` steps; step 0 is the analysis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastRun {
    /// Initialization time, truncated to the top of the hour
    pub start: DateTime<Utc>,
    /// Number of forecast hours
    pub duration_hours: u32,
}

impl ForecastRun {
    /// Parse a `<date>_PT<digits>H` run identifier.
    pub fn parse(latest: &str) -> FrameResult<Self> {
        let malformed = |why: &str| {
            FrameError::MalformedMetadata(format!("run identifier '{}': {}", latest, why))
        };

        let (date_part, duration_part) = latest
            .split_once('_')
            .ok_or_else(|| malformed("expected <date>_PT<hours>H"))?;

        let hours = duration_part
            .strip_prefix("PT")
            .and_then(|rest| rest.strip_suffix('H'))
            .ok_or_else(|| malformed("duration must look like PT<hours>H"))?;
        if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("duration hours must be digits"));
        }
        let duration_hours: u32 = hours
            .parse()
            .map_err(|_| malformed("duration hours out of range"))?;

        let start = parse_run_start(date_part).ok_or_else(|| malformed("unparsable date"))?;
        let start = truncate_to_hour(start);
        start
            .checked_add_signed(Duration::hours(duration_hours as i64))
            .ok_or_else(|| malformed("run ends past the representable calendar"))?;

        Ok(Self {
            start,
            duration_hours,
        })
    }

    /// Number of time steps (forecast hours plus the analysis step).
    pub fn step_count(&self) -> usize {
        self.duration_hours as usize + 1
    }

    /// Highest valid time index.
    pub fn last_index(&self) -> usize {
        self.duration_hours as usize
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::hours(self.duration_hours as i64)
    }

    /// `(start, end)` of the forecast.
    pub fn time_interval(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end())
    }

    /// ISO 8601 interval `start/end`, as consumed by time-dimension drivers.
    pub fn iso_interval(&self) -> String {
        format!(
            "{}/{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end().format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    /// Valid time of step `index`.
    pub fn step_time(&self, index: usize) -> Option<DateTime<Utc>> {
        if index > self.last_index() {
            return None;
        }
        Some(self.start + Duration::hours(index as i64))
    }

    /// All valid times, one per hour.
    pub fn time_steps(&self) -> Vec<DateTime<Utc>> {
        (0..self.step_count())
            .map(|i| self.start + Duration::hours(i as i64))
            .collect()
    }

    /// Time index of an instant, if it falls exactly on a step.
    pub fn index_of(&self, instant: DateTime<Utc>) -> Option<usize> {
        let offset = instant - self.start;
        if offset < Duration::zero() || offset.num_seconds() % 3600 != 0 {
            return None;
        }
        let index = offset.num_hours() as usize;
        (index <= self.last_index()).then_some(index)
    }
}

/// `(start, end)` of the forecast described by a run identifier.
pub fn time_interval(latest: &str) -> FrameResult<(DateTime<Utc>, DateTime<Utc>)> {
    ForecastRun::parse(latest).map(|run| run.time_interval())
}

fn parse_run_start(s: &str) -> Option<DateTime<Utc>> {
    // Compact hour form used by run identifiers: 2025-07-28T00Z
    let compact = format!("{}:00:00", s.trim_end_matches('Z'));
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&compact, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }

    // Full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Without timezone (assume UTC)
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt));
    }

    // Date only
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn truncate_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}
