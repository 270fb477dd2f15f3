use crate::domain::models::{Job, JobStatus};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Tokyo;
const MILLIS_PER_MINUTE: i64 = 60_000;

/// Business-hour policy used to turn wall-clock spans into effective minutes.
///
/// Within each local day, time before `lunch_start` and between `lunch_end` and
/// `end_of_day` counts; the lunch window and everything from `end_of_day` to
/// midnight is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub timezone: Tz,
    pub lunch_start: NaiveTime,
    pub lunch_end: NaiveTime,
    pub end_of_day: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            lunch_start: hm(12, 0),
            lunch_end: hm(13, 0),
            end_of_day: hm(17, 0),
        }
    }
}

impl BusinessHours {
    pub fn parse(
        timezone: &str,
        lunch_start: &str,
        lunch_end: &str,
        end_of_day: &str,
    ) -> Result<Self, String> {
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|error| format!("unknown timezone '{timezone}': {error}"))?;
        let hours = Self {
            timezone,
            lunch_start: parse_hhmm(lunch_start, "businessHours.lunchStart")?,
            lunch_end: parse_hhmm(lunch_end, "businessHours.lunchEnd")?,
            end_of_day: parse_hhmm(end_of_day, "businessHours.endOfDay")?,
        };
        hours.validate()?;
        Ok(hours)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lunch_start >= self.lunch_end {
            return Err("businessHours.lunchStart must be before businessHours.lunchEnd".to_string());
        }
        Ok(())
    }

    pub fn is_after_hours(&self, at: DateTime<Utc>) -> bool {
        at.with_timezone(&self.timezone).time() >= self.end_of_day
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    fn counted_windows(&self) -> Vec<(NaiveTime, NaiveTime)> {
        let mut windows = Vec::with_capacity(2);
        let morning_end = self.lunch_start.min(self.end_of_day);
        let midnight = NaiveTime::default();
        if morning_end > midnight {
            windows.push((midnight, morning_end));
        }
        if self.lunch_end < self.end_of_day {
            windows.push((self.lunch_end, self.end_of_day));
        }
        windows
    }

    fn instant(&self, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        let local = day.and_time(time);
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                // Wall-clock gap (DST jump): the window starts when the clock resumes.
                self.timezone
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })
            .map(|value| value.with_timezone(&Utc))
    }
}

pub fn minutes_in_session(start: DateTime<Utc>, end: DateTime<Utc>, hours: &BusinessHours) -> u32 {
    if start >= end {
        return 0;
    }

    let windows = hours.counted_windows();
    let last_day = hours.local_date(end);
    let mut day = hours.local_date(start);
    let mut counted_millis: i64 = 0;

    while day <= last_day {
        for (from, to) in &windows {
            let (Some(window_start), Some(window_end)) =
                (hours.instant(day, *from), hours.instant(day, *to))
            else {
                continue;
            };
            let lower = start.max(window_start);
            let upper = end.min(window_end);
            if upper > lower {
                counted_millis += (upper - lower).num_milliseconds();
            }
        }
        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }

    let minutes = (counted_millis + MILLIS_PER_MINUTE / 2) / MILLIS_PER_MINUTE;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// Effective minutes accumulated by a job.
///
/// Closed sessions always count. The trailing open session counts up to `now`
/// only while the job is running. Sessions that end before they start are
/// skipped with a warning.
pub fn total_minutes(job: &Job, now: DateTime<Utc>, hours: &BusinessHours) -> u32 {
    let last_index = job.sessions.len().saturating_sub(1);
    let mut total: u32 = 0;

    for (index, session) in job.sessions.iter().enumerate() {
        match session.end {
            Some(end) if end < session.start => {
                tracing::warn!(
                    drawing_number = %job.drawing_number,
                    start = %session.start,
                    end = %end,
                    "session ends before it starts; skipped from accounting"
                );
            }
            Some(end) => {
                total = total.saturating_add(minutes_in_session(session.start, end, hours));
            }
            None if index == last_index && job.status == JobStatus::Active => {
                total = total.saturating_add(minutes_in_session(session.start, now, hours));
            }
            None => {
                tracing::warn!(
                    drawing_number = %job.drawing_number,
                    status = job.status.as_str(),
                    start = %session.start,
                    "open session on a stopped job; skipped from accounting"
                );
            }
        }
    }

    total
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

fn parse_hhmm(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| format!("{field_name} must be HH:MM"))
}
