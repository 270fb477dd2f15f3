use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkSession {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl WorkSession {
    pub fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(rename = "duration", alias = "durationMinutes")]
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub drawing_number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_item_quantity")]
    pub item_quantity: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sessions: Vec<WorkSession>,
    #[serde(default)]
    pub breaks: Vec<BreakInterval>,
    #[serde(default)]
    pub total_time_minutes: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        drawing_number: impl Into<String>,
        description: impl Into<String>,
        item_quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            drawing_number: drawing_number.into(),
            description: description.into(),
            item_quantity,
            started_at: now,
            last_updated: Some(now),
            sessions: vec![WorkSession::open(now)],
            breaks: Vec::new(),
            total_time_minutes: 0,
            status: JobStatus::Active,
            completed_at: None,
        }
    }

    pub fn restarted_from(previous: &Job, item_quantity: u32, now: DateTime<Utc>) -> Self {
        Self::new(
            previous.drawing_number.clone(),
            previous.description.clone(),
            item_quantity,
            now,
        )
    }

    pub fn is_paused(&self) -> bool {
        self.status == JobStatus::Paused
    }

    pub fn open_session(&self) -> Option<&WorkSession> {
        self.sessions.last().filter(|session| session.is_open())
    }

    /// Closes the trailing open session, if any, and returns whether one was closed.
    ///
    /// A session opened after a manual break may start in the future; it is
    /// closed at its own start rather than before it.
    pub fn close_open_session(&mut self, at: DateTime<Utc>) -> bool {
        match self.sessions.last_mut() {
            Some(session) if session.is_open() => {
                session.end = Some(at.max(session.start));
                true
            }
            _ => false,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.last_updated.unwrap_or(self.started_at)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.drawing_number, "job.drawingNumber")?;
        if self.item_quantity == 0 {
            return Err("job.itemQuantity must be >= 1".to_string());
        }

        let last_index = self.sessions.len().saturating_sub(1);
        for (index, session) in self.sessions.iter().enumerate() {
            match session.end {
                Some(end) if end < session.start => {
                    return Err(format!("job.sessions[{index}] ends before it starts"));
                }
                None if index != last_index => {
                    return Err(format!("job.sessions[{index}] is open but not the last session"));
                }
                None if self.status != JobStatus::Active => {
                    return Err(format!(
                        "job.sessions[{index}] is open on a {} job",
                        self.status.as_str()
                    ));
                }
                _ => {}
            }
        }
        for pair in self.sessions.windows(2) {
            if let Some(end) = pair[0].end {
                if pair[1].start < end {
                    return Err("job.sessions must be chronological and non-overlapping".to_string());
                }
            }
        }

        for (index, interval) in self.breaks.iter().enumerate() {
            if interval.end < interval.start {
                return Err(format!("job.breaks[{index}] ends before it starts"));
            }
        }

        match (self.status, self.completed_at) {
            (JobStatus::Completed, None) => Err("completed job must carry completedAt".to_string()),
            (JobStatus::Active | JobStatus::Paused, Some(_)) => {
                Err("only completed jobs carry completedAt".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub active_job: Option<Job>,
    #[serde(default)]
    pub completed_jobs: Vec<Job>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn reset_at(now: DateTime<Utc>) -> Self {
        Self {
            active_job: None,
            completed_jobs: Vec::new(),
            last_sync: Some(now),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(active) = &self.active_job {
            if active.status == JobStatus::Completed {
                return Err("activeJob must not be completed".to_string());
            }
            active.validate()?;
        }
        for job in &self.completed_jobs {
            if job.status != JobStatus::Completed {
                return Err(format!(
                    "completed job {} has status {}",
                    job.drawing_number,
                    job.status.as_str()
                ));
            }
            job.validate()?;
        }
        Ok(())
    }
}

fn default_item_quantity() -> u32 {
    1
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_completed_job() -> Job {
        let mut job = Job::new(
            "D-100",
            "Flange turning",
            5,
            fixed_time("2026-02-16T00:00:00Z"),
        );
        job.close_open_session(fixed_time("2026-02-16T02:00:00Z"));
        job.status = JobStatus::Completed;
        job.completed_at = Some(fixed_time("2026-02-16T02:00:00Z"));
        job.total_time_minutes = 120;
        job
    }

    #[test]
    fn new_job_has_single_open_session() {
        let now = fixed_time("2026-02-16T00:00:00Z");
        let job = Job::new("D-100", "", 1, now);
        assert_eq!(job.sessions, vec![WorkSession::open(now)]);
        assert_eq!(job.status, JobStatus::Active);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn job_validate_rejects_empty_drawing_number() {
        let job = Job::new("  ", "", 1, fixed_time("2026-02-16T00:00:00Z"));
        assert!(job.validate().is_err());
    }

    #[test]
    fn job_validate_rejects_open_session_in_the_middle() {
        let mut job = Job::new("D-100", "", 1, fixed_time("2026-02-16T00:00:00Z"));
        job.sessions
            .push(WorkSession::open(fixed_time("2026-02-16T01:00:00Z")));
        assert!(job.validate().is_err());
    }

    #[test]
    fn job_validate_rejects_overlapping_sessions() {
        let mut job = sample_completed_job();
        job.sessions.push(WorkSession::closed(
            fixed_time("2026-02-16T01:00:00Z"),
            fixed_time("2026-02-16T03:00:00Z"),
        ));
        assert!(job.validate().is_err());
    }

    #[test]
    fn restarted_job_keeps_identity_fields_only() {
        let previous = sample_completed_job();
        let now = fixed_time("2026-02-17T00:00:00Z");
        let restarted = Job::restarted_from(&previous, 8, now);

        assert_eq!(restarted.drawing_number, previous.drawing_number);
        assert_eq!(restarted.description, previous.description);
        assert_eq!(restarted.item_quantity, 8);
        assert_eq!(restarted.started_at, now);
        assert!(restarted.breaks.is_empty());
        assert_eq!(restarted.sessions.len(), 1);
        assert_eq!(previous.status, JobStatus::Completed);
    }

    #[test]
    fn app_state_reads_legacy_document() {
        let raw = r#"{
            "activeJob": null,
            "completedJobs": [{
                "drawingNumber": "A-1",
                "startedAt": "2026-02-16T00:00:00.000Z",
                "sessions": [{"start": "2026-02-16T00:00:00.000Z", "end": "2026-02-16T01:00:00.000Z"}],
                "breaks": [{"start": "2026-02-16T01:00:00.000Z", "end": "2026-02-16T01:10:00.000Z", "duration": 10}],
                "totalTimeMinutes": 60,
                "status": "completed",
                "completedAt": "2026-02-16T01:00:00.000Z"
            }],
            "lastSync": null
        }"#;

        let state: AppState = serde_json::from_str(raw).expect("parse legacy document");
        let job = &state.completed_jobs[0];
        assert_eq!(job.item_quantity, 1);
        assert_eq!(job.description, "");
        assert_eq!(job.last_updated, None);
        assert_eq!(job.breaks[0].duration_minutes, 10);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn app_state_serializes_camel_case_fields() {
        let state = AppState {
            active_job: None,
            completed_jobs: vec![sample_completed_job()],
            last_sync: None,
        };
        let value = serde_json::to_value(&state).expect("serialize state");

        assert!(value.get("activeJob").is_some());
        let job = &value["completedJobs"][0];
        assert_eq!(job["drawingNumber"], "D-100");
        assert_eq!(job["itemQuantity"], 5);
        assert_eq!(job["totalTimeMinutes"], 120);
        assert_eq!(job["status"], "completed");
    }

    #[test]
    fn app_state_validate_rejects_completed_active_job() {
        let state = AppState {
            active_job: Some(sample_completed_job()),
            completed_jobs: Vec::new(),
            last_sync: None,
        };
        assert!(state.validate().is_err());
    }
}
