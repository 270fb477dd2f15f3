use crate::domain::models::{Job, JobStatus};
use crate::domain::time_accounting::{BusinessHours, minutes_in_session, total_minutes};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaySessions {
    pub date: NaiveDate,
    pub first_start: DateTime<Utc>,
    pub last_end: Option<DateTime<Utc>>,
    pub total_minutes: u32,
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobView {
    pub drawing_number: String,
    pub description: String,
    pub item_quantity: u32,
    pub status: JobStatus,
    pub total_minutes: u32,
    pub total_display: String,
    pub current_session_minutes: u32,
    pub paused_since: Option<DateTime<Utc>>,
    pub days: Vec<DaySessions>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedJobRow {
    pub index: usize,
    pub drawing_number: String,
    pub description: String,
    pub completed_on: Option<NaiveDate>,
    pub item_quantity: u32,
    pub total_minutes: u32,
    pub minutes_per_item: u32,
}

pub fn active_job_view(job: &Job, now: DateTime<Utc>, hours: &BusinessHours) -> ActiveJobView {
    let total = total_minutes(job, now, hours);
    let current_session_minutes = match job.open_session() {
        Some(session) if job.status == JobStatus::Active => minutes_in_session(session.start, now, hours),
        _ => 0,
    };
    let paused_since = if job.is_paused() {
        job.sessions.last().and_then(|session| session.end)
    } else {
        None
    };

    ActiveJobView {
        drawing_number: job.drawing_number.clone(),
        description: job.description.clone(),
        item_quantity: job.item_quantity,
        status: job.status,
        total_minutes: total,
        total_display: format_minutes(total),
        current_session_minutes,
        paused_since,
        days: group_sessions_by_day(job, now, hours),
    }
}

/// Groups sessions by the local business date of their start, newest day first.
///
/// The running session is measured up to `now`; an open session on a stopped
/// job counts as zero.
pub fn group_sessions_by_day(job: &Job, now: DateTime<Utc>, hours: &BusinessHours) -> Vec<DaySessions> {
    let mut by_day: BTreeMap<NaiveDate, Vec<SessionView>> = BTreeMap::new();

    for session in &job.sessions {
        let minutes = match session.end {
            Some(end) => minutes_in_session(session.start, end, hours),
            None if job.status == JobStatus::Active => minutes_in_session(session.start, now, hours),
            None => 0,
        };
        by_day
            .entry(hours.local_date(session.start))
            .or_default()
            .push(SessionView {
                start: session.start,
                end: session.end,
                minutes,
            });
    }

    by_day
        .into_iter()
        .rev()
        .filter_map(|(date, sessions)| {
            let first_start = sessions.first()?.start;
            let last_end = sessions.last()?.end;
            let total_minutes = sessions.iter().map(|session| session.minutes).sum();
            Some(DaySessions {
                date,
                first_start,
                last_end,
                total_minutes,
                sessions,
            })
        })
        .collect()
}

pub fn completed_job_rows(jobs: &[Job], hours: &BusinessHours) -> Vec<CompletedJobRow> {
    jobs.iter()
        .enumerate()
        .map(|(index, job)| CompletedJobRow {
            index,
            drawing_number: job.drawing_number.clone(),
            description: job.description.clone(),
            completed_on: job.completed_at.map(|at| hours.local_date(at)),
            item_quantity: job.item_quantity,
            total_minutes: job.total_time_minutes,
            minutes_per_item: rounded_ratio(job.total_time_minutes, job.item_quantity),
        })
        .collect()
}

/// `45` → `"45m"`, `180` → `"3h"`, `135` → `"2h 15m"`.
pub fn format_minutes(total: u32) -> String {
    let hours = total / 60;
    let minutes = total % 60;
    match (hours, minutes) {
        (0, minutes) => format!("{minutes}m"),
        (hours, 0) => format!("{hours}h"),
        (hours, minutes) => format!("{hours}h {minutes}m"),
    }
}

pub(crate) fn rounded_ratio(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return 0;
    }
    let numerator = u64::from(numerator);
    let denominator = u64::from(denominator);
    u32::try_from((2 * numerator + denominator) / (2 * denominator)).unwrap_or(u32::MAX)
}
