//! C6: rejects plans with unresolvable names, coerces named time periods into
//! concrete UTC `[start, end)` bounds, and enforces the row-limit ceiling.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::intent::plan::{QueryPlan, TimeGrain, TimeRange};
use crate::semantic::SemanticContext;

use super::error::{ValidationError, ValidationResult};

static ROLLING_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^last_(\d+)_(day|days|week|weeks|month|months|year|years)$").unwrap());

fn is_date_typed(data_type: &str) -> bool {
    let lower = data_type.to_lowercase();
    lower.contains("date") || lower.contains("time")
}

fn day_start(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&dt.date_naive().and_hms_opt(0, 0, 0).unwrap())
}

fn date_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

/// Start of the Monday on or before `date`.
fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    let days_since_monday = date.weekday().num_days_from_monday();
    date - Duration::days(days_since_monday as i64)
}

/// `(quarter_start_month, quarter_index)` for the quarter containing `date`,
/// under the Jan/Apr/Jul/Oct calendar convention.
fn quarter_start_month(month: u32) -> u32 {
    match month {
        1..=3 => 1,
        4..=6 => 4,
        7..=9 => 7,
        _ => 10,
    }
}

fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, 1).unwrap()
}

/// Resolve a named period into a concrete `[start, end)` UTC interval,
/// anchored at `now`. Calendar periods (week/quarter/year) use documented
/// calendar boundaries; `last_N_<unit>` periods are rolling windows ending
/// at `now`.
fn resolve_named_period(name: &str, now: DateTime<Utc>) -> ValidationResult<(DateTime<Utc>, DateTime<Utc>)> {
    let today = now.date_naive();
    match name {
        "today" => Ok((day_start(now), date_start(today + Duration::days(1)))),
        "yesterday" => Ok((date_start(today - Duration::days(1)), day_start(now))),
        "last_week" => {
            let this_monday = monday_on_or_before(today);
            let last_monday = this_monday - Duration::days(7);
            Ok((date_start(last_monday), date_start(this_monday)))
        }
        "last_month" => {
            let this_month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
            let last_month_start = add_months(this_month_start, -1);
            Ok((date_start(last_month_start), date_start(this_month_start)))
        }
        "last_quarter" => {
            let qsm = quarter_start_month(today.month());
            let this_quarter_start = NaiveDate::from_ymd_opt(today.year(), qsm, 1).unwrap();
            let last_quarter_start = add_months(this_quarter_start, -3);
            Ok((date_start(last_quarter_start), date_start(this_quarter_start)))
        }
        "last_year" => {
            let this_year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
            let last_year_start = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).unwrap();
            Ok((date_start(last_year_start), date_start(this_year_start)))
        }
        "year_to_date" => {
            let this_year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
            Ok((date_start(this_year_start), now))
        }
        "month_to_date" => {
            let this_month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap();
            Ok((date_start(this_month_start), now))
        }
        other => {
            if let Some(caps) = ROLLING_PERIOD.captures(other) {
                let n: i64 = caps[1].parse().unwrap_or(0);
                let unit = caps[2].to_lowercase();
                let start = match unit.as_str() {
                    "day" | "days" => now - Duration::days(n),
                    "week" | "weeks" => now - Duration::weeks(n),
                    "month" | "months" => date_start(add_months(today, -(n as i32))),
                    _ => date_start(NaiveDate::from_ymd_opt(today.year() - n as i32, today.month(), today.day()).unwrap_or(today)),
                };
                return Ok((start, now));
            }
            Err(ValidationError::UnknownNamedPeriod(name.to_string()))
        }
    }
}

/// Validate and normalize a plan: unknown metric/dimension names, named
/// time-period resolution, limit ceiling, and time-grain/dimension
/// compatibility. Returns a plan with `time_range` always resolved to
/// `TimeRange::Explicit` when one was requested.
pub fn validate(
    plan: &QueryPlan,
    semantic: &SemanticContext,
    max_row_limit: u64,
    now: DateTime<Utc>,
) -> ValidationResult<QueryPlan> {
    let mut plan = plan.clone();

    if let Some(metric) = &plan.metric {
        if !semantic.fields.iter().any(|f| f.active && &f.name == metric) {
            return Err(ValidationError::UnknownMetric(metric.clone()));
        }
    }

    for dim in &plan.dimensions {
        if !semantic.fields.iter().any(|f| f.active && &f.name == dim) {
            return Err(ValidationError::UnknownDimension(dim.clone()));
        }
    }

    if let Some(limit) = plan.limit {
        if limit > max_row_limit {
            return Err(ValidationError::LimitExceeded { limit, max: max_row_limit });
        }
    }

    if let Some(TimeRange::Named(name)) = &plan.time_range {
        let (start, end) = resolve_named_period(name, now)?;
        plan.time_range = Some(TimeRange::Explicit { start, end });
    }

    if let Some(grain) = plan.time_grain {
        let has_date_dimension = plan.dimensions.iter().any(|dim| {
            semantic.fields.iter().any(|f| f.active && &f.name == dim && is_date_typed(&f.data_type))
        });
        if !has_date_dimension {
            return Err(ValidationError::IncompatibleTimeGrain { grain: format!("{:?}", grain) });
        }
    }

    Ok(plan)
}
