// Recurrence rules for scheduled workflows
//
// All computations are strictly after `now`. A slot that matches `now`
// exactly (or has just fired) must roll over to the next occurrence, so the
// same slot never fires twice.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

/// How often a scheduled workflow recurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Hourly,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Once => "once",
            ScheduleType::Hourly => "hourly",
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Biweekly => "biweekly",
            ScheduleType::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(ScheduleType::Once),
            "hourly" => Some(ScheduleType::Hourly),
            "daily" => Some(ScheduleType::Daily),
            "weekly" => Some(ScheduleType::Weekly),
            "biweekly" => Some(ScheduleType::Biweekly),
            "monthly" => Some(ScheduleType::Monthly),
            _ => None,
        }
    }
}

/// Recurrence parameters, persisted as JSON on the workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minute of the hour, for hourly schedules
    pub minute_of_hour: Option<u32>,
    /// Time of day as "HH:MM", for daily/weekly/biweekly/monthly schedules
    pub time: Option<String>,
    /// Weekday name ("monday", ...), for weekly/biweekly schedules
    pub day_of_week: Option<String>,
    /// Day of month (1-31, clamped to the month's length), for monthly schedules
    pub day_of_month: Option<u32>,
    /// Date in an "on" week, for biweekly schedules
    pub anchor_date: Option<NaiveDate>,
}

impl ScheduleConfig {
    fn time_of_day(&self) -> NaiveTime {
        self.time
            .as_deref()
            .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
            .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap())
    }

    fn weekday(&self) -> Weekday {
        self.day_of_week
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(Weekday::Mon)
    }
}

/// Compute the next run strictly after `now` for the given recurrence rule.
/// Returns None for `once` (one-shot schedules have no next slot).
pub fn next_run(
    schedule_type: ScheduleType,
    config: &ScheduleConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match schedule_type {
        ScheduleType::Once => None,
        ScheduleType::Hourly => Some(next_hourly(config, now)),
        ScheduleType::Daily => Some(next_daily(config, now)),
        ScheduleType::Weekly => Some(next_weekly(config, now)),
        ScheduleType::Biweekly => Some(next_biweekly(config, now)),
        ScheduleType::Monthly => Some(next_monthly(config, now)),
    }
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn next_hourly(config: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let minute = config.minute_of_hour.unwrap_or(0).min(59);
    let candidate = now
        .with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}

fn next_daily(config: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = at(now.date_naive(), config.time_of_day());
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn next_weekly(config: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let target = config.weekday();
    let days_ahead =
        (target.num_days_from_monday() as i64 - now.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
    let candidate = at(
        now.date_naive() + Duration::days(days_ahead),
        config.time_of_day(),
    );
    if candidate > now {
        candidate
    } else {
        candidate + Duration::weeks(1)
    }
}

/// Like weekly, but only every other week, counted in whole weeks elapsed
/// since the anchor date. ISO week-number parity would break across 53-week
/// years (week 53 rolls over to week 1, both odd, giving a 7-day gap), so the
/// distance to the anchor decides instead. An off-week candidate moves one
/// week ahead, keeping successive runs exactly 14 days apart.
fn next_biweekly(config: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut candidate = next_weekly(config, now);
    let anchor = config.anchor_date.unwrap_or_else(|| candidate.date_naive());
    let weeks_from_anchor = (candidate.date_naive() - anchor).num_days().div_euclid(7);
    if weeks_from_anchor.rem_euclid(2) != 0 {
        candidate += Duration::weeks(1);
    }
    candidate
}

fn next_monthly(config: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let day = config.day_of_month.unwrap_or(1);
    let time = config.time_of_day();

    let candidate = at(clamped_date(now.year(), now.month(), day), time);
    if candidate > now {
        return candidate;
    }
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    at(clamped_date(year, month, day), time)
}

/// Build a date, clamping the day to the last valid day of the target month
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let last = last_day_of_month(year, month);
    NaiveDate::from_ymd_opt(year, month, day.clamp(1, last))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, last).unwrap())
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn weekly_config(day: &str, time: &str) -> ScheduleConfig {
        ScheduleConfig {
            day_of_week: Some(day.into()),
            time: Some(time.into()),
            ..Default::default()
        }
    }

    #[test]
    fn hourly_rolls_to_next_hour_when_minute_passed() {
        let config = ScheduleConfig {
            minute_of_hour: Some(15),
            ..Default::default()
        };
        // 10:20 -> 11:15
        let next = next_run(ScheduleType::Hourly, &config, utc(2025, 3, 10, 10, 20)).unwrap();
        assert_eq!(next, utc(2025, 3, 10, 11, 15));
        // 10:10 -> 10:15
        let next = next_run(ScheduleType::Hourly, &config, utc(2025, 3, 10, 10, 10)).unwrap();
        assert_eq!(next, utc(2025, 3, 10, 10, 15));
    }

    #[test]
    fn hourly_exact_slot_never_refires() {
        let config = ScheduleConfig {
            minute_of_hour: Some(15),
            ..Default::default()
        };
        let next = next_run(ScheduleType::Hourly, &config, utc(2025, 3, 10, 10, 15)).unwrap();
        assert_eq!(next, utc(2025, 3, 10, 11, 15));
    }

    #[test]
    fn daily_same_day_when_time_ahead() {
        let config = ScheduleConfig {
            time: Some("14:30".into()),
            ..Default::default()
        };
        let next = next_run(ScheduleType::Daily, &config, utc(2025, 3, 10, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 10, 14, 30));
    }

    #[test]
    fn weekly_passed_slot_moves_to_following_week() {
        // 2025-03-10 is a Monday; at 13:00 the 12:00 slot has passed
        let next = next_run(
            ScheduleType::Weekly,
            &weekly_config("monday", "12:00"),
            utc(2025, 3, 10, 13, 0),
        )
        .unwrap();
        assert_eq!(next, utc(2025, 3, 17, 12, 0));
    }

    #[test]
    fn weekly_upcoming_weekday_stays_in_this_week() {
        let next = next_run(
            ScheduleType::Weekly,
            &weekly_config("friday", "08:00"),
            utc(2025, 3, 10, 13, 0),
        )
        .unwrap();
        assert_eq!(next, utc(2025, 3, 14, 8, 0));
    }

    #[test]
    fn biweekly_off_week_candidate_moves_a_week_ahead() {
        let mut config = weekly_config("monday", "12:00");
        // Anchor Monday 2025-03-10; at 13:00 that slot has passed, so the
        // weekly candidate lands in the off week and moves ahead
        config.anchor_date = NaiveDate::from_ymd_opt(2025, 3, 10);
        let next = next_run(ScheduleType::Biweekly, &config, utc(2025, 3, 10, 13, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 24, 12, 0));

        config.anchor_date = NaiveDate::from_ymd_opt(2025, 3, 17);
        let next = next_run(ScheduleType::Biweekly, &config, utc(2025, 3, 10, 13, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 17, 12, 0));
    }

    #[test]
    fn biweekly_runs_fourteen_days_apart() {
        let mut config = weekly_config("monday", "12:00");
        config.anchor_date = NaiveDate::from_ymd_opt(2025, 3, 10);

        let first = next_run(ScheduleType::Biweekly, &config, utc(2025, 3, 3, 13, 0)).unwrap();
        assert_eq!(first, utc(2025, 3, 10, 12, 0));
        let second = next_run(ScheduleType::Biweekly, &config, first).unwrap();
        assert_eq!(second - first, Duration::weeks(2));
    }

    #[test]
    fn biweekly_spacing_survives_a_fifty_three_week_year() {
        // ISO year 2026 has 53 weeks; 2026-12-28 is the Monday of week 53 and
        // 2027-01-04 the Monday of week 1, consecutive odd week numbers
        let mut config = weekly_config("monday", "12:00");
        config.anchor_date = NaiveDate::from_ymd_opt(2026, 12, 28);

        let first = next_run(ScheduleType::Biweekly, &config, utc(2026, 12, 28, 11, 0)).unwrap();
        assert_eq!(first, utc(2026, 12, 28, 12, 0));
        let second = next_run(ScheduleType::Biweekly, &config, first).unwrap();
        assert_eq!(second, utc(2027, 1, 11, 12, 0));
        assert_eq!(second - first, Duration::weeks(2));
    }

    #[test]
    fn monthly_clamps_to_last_day_of_month() {
        let config = ScheduleConfig {
            day_of_month: Some(31),
            time: Some("06:00".into()),
            ..Default::default()
        };
        // From mid-February, day 31 clamps to Feb 28
        let next = next_run(ScheduleType::Monthly, &config, utc(2025, 2, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 2, 28, 6, 0));
        // March has 31 days, no clamping needed
        let next = next_run(ScheduleType::Monthly, &config, utc(2025, 3, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 31, 6, 0));
    }

    #[test]
    fn monthly_rolls_over_year_boundary() {
        let config = ScheduleConfig {
            day_of_month: Some(5),
            time: Some("06:00".into()),
            ..Default::default()
        };
        let next = next_run(ScheduleType::Monthly, &config, utc(2025, 12, 20, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 5, 6, 0));
    }

    #[test]
    fn once_has_no_next_slot() {
        assert!(next_run(ScheduleType::Once, &ScheduleConfig::default(), Utc::now()).is_none());
    }
}
