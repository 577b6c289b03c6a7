//! Statistics panel: filtered counts and targets scaled to the share of the
//! month's working days the selected range covers.

use chrono::{Datelike, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{DateRange, TestRecord, WarningRecord, iso_date};
use crate::report::{counts_as_complete, counts_as_non_compliant, counts_as_partial};

/// Source of "today"
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Today's date in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Monthly goals for the three tracked test counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    pub complete: u32,
    pub partial: u32,
    pub total: u32,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            complete: 400,
            partial: 200,
            total: 600,
        }
    }
}

impl Targets {
    /// Each target scaled by `in_range / in_month` working days, capped at the full month
    pub fn scaled(&self, in_range: u32, in_month: u32) -> Targets {
        Targets {
            complete: proportional_target(self.complete, in_range, in_month),
            partial: proportional_target(self.partial, in_range, in_month),
            total: proportional_target(self.total, in_range, in_month),
        }
    }
}

pub fn is_working_day(day: NaiveDate) -> bool {
    !matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Monday-to-Friday days in `start..=end`; zero when the range is inverted
pub fn working_days(start: NaiveDate, end: NaiveDate) -> u32 {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| is_working_day(*day))
        .count() as u32
}

/// First and last day of the month containing `day`
pub fn month_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = day.with_day(1).unwrap_or(day);
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day);
    (first, last)
}

pub fn proportional_target(monthly: u32, in_range: u32, in_month: u32) -> u32 {
    if in_month == 0 {
        return monthly;
    }
    let ratio = (f64::from(in_range) / f64::from(in_month)).min(1.0);
    (f64::from(monthly) * ratio).round() as u32
}

/// Everything the statistics tab shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPanel {
    pub start: String,
    pub end: String,
    pub filtered: bool,
    pub tests: usize,
    pub warnings: usize,
    pub complete: usize,
    pub partial: usize,
    pub non_compliant: usize,
    pub working_days: u32,
    pub month_working_days: u32,
    pub target: Targets,
    pub progress: u32,
}

impl StatsPanel {
    /// Counts over `range`; open bounds default to the current month
    pub fn compute(
        tests: &[&TestRecord],
        warnings: &[&WarningRecord],
        range: &DateRange,
        monthly: &Targets,
        today: NaiveDate,
    ) -> Self {
        let (month_start, month_end) = month_bounds(today);
        let start = range.start.unwrap_or(month_start);
        let end = range.end.unwrap_or(month_end);
        let effective = DateRange::new(Some(start), Some(end));

        let tests: Vec<_> = tests.iter().filter(|t| effective.contains(&t.date)).collect();
        let warnings = warnings.iter().filter(|w| effective.contains(&w.date)).count();

        let in_range = working_days(start, end);
        let in_month = working_days(month_start, month_end);
        let target = monthly.scaled(in_range, in_month);
        let progress = if target.total == 0 {
            0
        } else {
            ((tests.len() as f64 / f64::from(target.total)) * 100.0).round() as u32
        };

        StatsPanel {
            start: iso_date(start),
            end: iso_date(end),
            filtered: !range.is_unbounded(),
            tests: tests.len(),
            warnings,
            complete: tests.iter().filter(|t| counts_as_complete(t)).count(),
            partial: tests.iter().filter(|t| counts_as_partial(t)).count(),
            non_compliant: tests.iter().filter(|t| counts_as_non_compliant(t)).count(),
            working_days: in_range,
            month_working_days: in_month,
            target,
            progress,
        }
    }
}
