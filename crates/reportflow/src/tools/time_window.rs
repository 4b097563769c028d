//! `time.window`: a pure function resolving a granularity into a dated range.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolInput, ToolObservation};

/// Resolves `{granularity, now?, offset?}` into `{start_date, end_date, label}`.
/// Performs no I/O; `now` is read from the input (or defaults to the current
/// time) so the tool stays a pure function of its arguments.
#[derive(Debug)]
pub struct TimeWindowTool;

#[async_trait]
impl Tool for TimeWindowTool {
    fn name(&self) -> &'static str {
        "time.window"
    }

    fn description(&self) -> &'static str {
        "Resolve a granularity (daily|weekly|monthly|yearly) and offset into a concrete date range."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "granularity": {"type": "string", "enum": ["daily", "weekly", "monthly", "yearly"]},
                "now": {"type": "string"},
                "offset": {"type": "integer"},
            },
            "required": ["granularity"],
        })
    }

    async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolObservation {
        let ToolInput::TimeWindow {
            granularity,
            now,
            offset,
        } = input
        else {
            return ToolObservation::failed("unexpected input for time.window");
        };

        let reference = now
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let offset = offset.unwrap_or(-1);

        match resolve_window(&granularity, reference, offset) {
            Some((start, end, label)) => ToolObservation::ok(json!({
                "start_date": start,
                "end_date": end,
                "label": label,
            })),
            None => ToolObservation::failed(format!("unknown granularity '{granularity}'")),
        }
    }
}

/// Resolve a granularity and signed offset (relative to `reference`, where
/// `-1` means "the previous complete period") into a `(start, end, label)`
/// triple of ISO date strings.
#[must_use]
pub fn resolve_window(
    granularity: &str,
    reference: DateTime<Utc>,
    offset: i64,
) -> Option<(String, String, String)> {
    let today = reference.date_naive();
    match granularity {
        "daily" => {
            let day = today + Duration::days(offset);
            Some((day.to_string(), day.to_string(), day.format("%Y-%m-%d").to_string()))
        }
        "weekly" => {
            let days_since_monday = today.weekday().num_days_from_monday() as i64;
            let this_monday = today - Duration::days(days_since_monday);
            let start = this_monday + Duration::weeks(offset);
            let end = start + Duration::days(6);
            Some((
                start.to_string(),
                end.to_string(),
                format!("week of {}", start.format("%Y-%m-%d")),
            ))
        }
        "monthly" => {
            let (year, month) = add_months(today.year(), today.month() as i32, offset);
            let start = NaiveDate::from_ymd_opt(year, month as u32, 1)?;
            let end = last_day_of_month(year, month as u32);
            Some((
                start.to_string(),
                end.to_string(),
                start.format("%Y-%m").to_string(),
            ))
        }
        "yearly" => {
            let year = today.year() + offset as i32;
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
            let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
            Some((start.to_string(), end.to_string(), year.to_string()))
        }
        _ => None,
    }
}

fn add_months(year: i32, month: i32, offset: i64) -> (i32, i32) {
    let total = (year as i64) * 12 + (month as i64 - 1) + offset;
    let year = (total.div_euclid(12)) as i32;
    let month = (total.rem_euclid(12)) as i32 + 1;
    (year, month)
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 28).expect("valid fallback date"))
        - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_offset_minus_one_is_yesterday() {
        let reference = DateTime::parse_from_rfc3339("2026-07-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end, _) = resolve_window("daily", reference, -1).unwrap();
        assert_eq!(start, "2026-07-30");
        assert_eq!(end, "2026-07-30");
    }

    #[test]
    fn monthly_offset_minus_one_spans_whole_previous_month() {
        let reference = DateTime::parse_from_rfc3339("2026-07-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end, label) = resolve_window("monthly", reference, -1).unwrap();
        assert_eq!(start, "2026-06-01");
        assert_eq!(end, "2026-06-30");
        assert_eq!(label, "2026-06");
    }

    #[test]
    fn monthly_offset_wraps_year_boundary() {
        let reference = DateTime::parse_from_rfc3339("2026-01-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end, _) = resolve_window("monthly", reference, -1).unwrap();
        assert_eq!(start, "2025-12-01");
        assert_eq!(end, "2025-12-31");
    }

    #[test]
    fn unknown_granularity_returns_none() {
        let reference = Utc::now();
        assert!(resolve_window("fortnightly", reference, 0).is_none());
    }

    #[tokio::test]
    async fn tool_execute_rejects_wrong_input_variant() {
        let tool = TimeWindowTool;
        let ctx = super::super::tests_support::test_context();
        let obs = tool.execute(ToolInput::SchemaListTables {}, &ctx).await;
        assert!(!obs.success);
    }
}
