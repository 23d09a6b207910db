use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries::{self, ServiceCount};
use crate::models::AppointmentStatus;
use crate::services::lifecycle::parse_appointment_date;

pub const TOP_SERVICES: i64 = 6;

/// Date boundaries used by the dashboard counters, all in shop-local time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsWindow {
    pub today_start: NaiveDateTime,
    pub today_end: NaiveDateTime,
    pub week_start: NaiveDateTime,
    pub month_start: NaiveDateTime,
}

impl StatsWindow {
    pub fn at(now: NaiveDateTime) -> Self {
        let today = now.date();
        Self {
            today_start: start_of_day(today),
            today_end: end_of_day(today),
            week_start: now - Duration::days(7),
            month_start: start_of_day(today.with_day(1).unwrap_or(today)),
        }
    }
}

fn start_of_day(d: NaiveDate) -> NaiveDateTime {
    d.and_time(chrono::NaiveTime::MIN)
}

fn end_of_day(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(23, 59, 59).unwrap_or_else(|| start_of_day(d))
}

/// Inclusive bounds of a calendar month, or `None` for an invalid month.
pub fn month_range(month: u32, year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next.pred_opt()?;
    Some((start_of_day(first), end_of_day(last)))
}

/// Parses a calendar range bound. A bare date used as the upper bound covers
/// the whole day.
pub fn parse_range_bound(s: &str, upper: bool) -> Option<NaiveDateTime> {
    let parsed = parse_appointment_date(s)?;
    let date_only = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok();
    Some(if upper && date_only {
        end_of_day(parsed.date())
    } else {
        parsed
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppointmentStats {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
    pub service_breakdown: Vec<ServiceCount>,
}

pub fn appointment_stats(conn: &Connection, now: NaiveDateTime) -> anyhow::Result<AppointmentStats> {
    let window = StatsWindow::at(now);
    let by_status = queries::count_appointments_by_status(conn)?;
    let count = |status: AppointmentStatus| by_status.get(&status).copied().unwrap_or(0);

    Ok(AppointmentStats {
        total: by_status.values().sum(),
        pending: count(AppointmentStatus::Pending),
        confirmed: count(AppointmentStatus::Confirmed),
        in_progress: count(AppointmentStatus::InProgress),
        completed: count(AppointmentStatus::Completed),
        cancelled: count(AppointmentStatus::Cancelled),
        today: queries::count_appointments_between(
            conn,
            &window.today_start,
            Some(&window.today_end),
        )?,
        this_week: queries::count_appointments_between(conn, &window.week_start, None)?,
        this_month: queries::count_appointments_between(conn, &window.month_start, None)?,
        service_breakdown: queries::service_breakdown(conn, TOP_SERVICES)?,
    })
}
