use crate::domain::models::{AppState, BreakInterval, Job, JobStatus, WorkSession, validate_non_empty};
use crate::domain::time_accounting::{BusinessHours, total_minutes};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("no active job")]
    NoActiveJob,
    #[error("job is already paused")]
    AlreadyPaused,
    #[error("job is not paused")]
    NotPaused,
    #[error("completed job not found at index {0}")]
    CompletedJobNotFound(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub drawing_number: String,
    pub description: String,
    pub item_quantity: u32,
}

impl NewJob {
    pub fn validate(&self) -> Result<(), TransitionError> {
        validate_non_empty(&self.drawing_number, "drawingNumber").map_err(TransitionError::Validation)?;
        validate_quantity(self.item_quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started {
        job: Job,
        completed: Option<Job>,
    },
    ConfirmationRequired {
        #[serde(rename = "activeDrawingNumber")]
        active_drawing_number: String,
    },
}

impl AppState {
    /// `NoActiveJob --start--> Active`.
    ///
    /// With a job already active this is a two-step protocol: without
    /// `confirm_replace` nothing changes and `ConfirmationRequired` is returned.
    pub fn start_job(
        &mut self,
        request: NewJob,
        confirm_replace: bool,
        now: DateTime<Utc>,
        hours: &BusinessHours,
    ) -> Result<StartOutcome, TransitionError> {
        request.validate()?;
        let job = Job::new(
            request.drawing_number.trim(),
            request.description.trim(),
            request.item_quantity,
            now,
        );
        self.begin(job, confirm_replace, now, hours)
    }

    pub fn restart_job(
        &mut self,
        index: usize,
        item_quantity: Option<u32>,
        confirm_replace: bool,
        now: DateTime<Utc>,
        hours: &BusinessHours,
    ) -> Result<StartOutcome, TransitionError> {
        let previous = self
            .completed_jobs
            .get(index)
            .ok_or(TransitionError::CompletedJobNotFound(index))?;
        if let Some(quantity) = item_quantity {
            validate_quantity(quantity)?;
        }
        let quantity = item_quantity.unwrap_or(previous.item_quantity.max(1));
        let job = Job::restarted_from(previous, quantity, now);
        self.begin(job, confirm_replace, now, hours)
    }

    pub fn pause_job(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> Result<&Job, TransitionError> {
        let job = self.active_job.as_mut().ok_or(TransitionError::NoActiveJob)?;
        if job.is_paused() {
            return Err(TransitionError::AlreadyPaused);
        }

        stop_work(job, now);
        job.status = JobStatus::Paused;
        touch(job, now, hours);
        Ok(&*job)
    }

    pub fn resume_job(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> Result<&Job, TransitionError> {
        let job = self.active_job.as_mut().ok_or(TransitionError::NoActiveJob)?;
        if !job.is_paused() {
            return Err(TransitionError::NotPaused);
        }

        let paused_at = pause_started_at(job);
        let ends_break = job.breaks.last().is_some_and(|interval| interval.end == paused_at);
        if paused_at > now && !ends_break {
            tracing::warn!(
                drawing_number = %job.drawing_number,
                paused_at = %paused_at,
                now = %now,
                "pause started in the future; work resumes at the pause instant"
            );
        }

        // Resuming inside a still-running manual break keeps that break.
        let resume_at = now.max(paused_at);
        if now > paused_at {
            job.breaks.push(BreakInterval {
                start: paused_at,
                end: now,
                duration_minutes: whole_minutes(now - paused_at),
            });
        }
        job.sessions.push(WorkSession::open(resume_at));
        job.status = JobStatus::Active;
        touch(job, now, hours);
        Ok(&*job)
    }

    pub fn toggle_pause(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> Result<&Job, TransitionError> {
        let paused = self
            .active_job
            .as_ref()
            .ok_or(TransitionError::NoActiveJob)?
            .is_paused();
        if paused {
            self.resume_job(now, hours)
        } else {
            self.pause_job(now, hours)
        }
    }

    /// Inserts a break of `minutes` starting now, or right after a manual break
    /// still in progress; work resumes when the break ends.
    pub fn add_manual_break(
        &mut self,
        minutes: i64,
        now: DateTime<Utc>,
        hours: &BusinessHours,
    ) -> Result<&Job, TransitionError> {
        if minutes <= 0 {
            return Err(TransitionError::Validation(
                "break minutes must be > 0".to_string(),
            ));
        }
        let duration_minutes = u32::try_from(minutes)
            .map_err(|_| TransitionError::Validation("break minutes are too large".to_string()))?;
        let job = self.active_job.as_mut().ok_or(TransitionError::NoActiveJob)?;
        if job.is_paused() {
            return Err(TransitionError::AlreadyPaused);
        }

        let break_start = stop_work(job, now);
        let break_end = break_start + Duration::minutes(minutes);
        job.breaks.push(BreakInterval {
            start: break_start,
            end: break_end,
            duration_minutes,
        });
        job.sessions.push(WorkSession::open(break_end));
        touch(job, now, hours);
        Ok(&*job)
    }

    pub fn complete_job(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> Result<Job, TransitionError> {
        let mut job = self.active_job.take().ok_or(TransitionError::NoActiveJob)?;

        stop_work(&mut job, now);
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        touch(&mut job, now, hours);

        self.completed_jobs.insert(0, job.clone());
        Ok(job)
    }

    pub fn auto_pause_if_due(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> bool {
        let running = self
            .active_job
            .as_ref()
            .is_some_and(|job| job.status == JobStatus::Active);
        if !running || !hours.is_after_hours(now) {
            return false;
        }
        self.pause_job(now, hours).is_ok()
    }

    pub fn refresh_running_total(&mut self, now: DateTime<Utc>, hours: &BusinessHours) -> Option<u32> {
        let job = self.active_job.as_mut()?;
        job.total_time_minutes = total_minutes(job, now, hours);
        Some(job.total_time_minutes)
    }

    fn begin(
        &mut self,
        job: Job,
        confirm_replace: bool,
        now: DateTime<Utc>,
        hours: &BusinessHours,
    ) -> Result<StartOutcome, TransitionError> {
        let completed = if let Some(active) = &self.active_job {
            if !confirm_replace {
                return Ok(StartOutcome::ConfirmationRequired {
                    active_drawing_number: active.drawing_number.clone(),
                });
            }
            Some(self.complete_job(now, hours)?)
        } else {
            None
        };

        self.active_job = Some(job.clone());
        Ok(StartOutcome::Started { job, completed })
    }
}

fn touch(job: &mut Job, now: DateTime<Utc>, hours: &BusinessHours) {
    job.total_time_minutes = total_minutes(job, now, hours);
    job.last_updated = Some(now);
}

/// Ends the running session and returns when work stopped. A session that
/// has not started yet (the tail of a manual break) is dropped, so work
/// counts as stopped at the end of that break.
fn stop_work(job: &mut Job, now: DateTime<Utc>) -> DateTime<Utc> {
    match job.open_session().map(|session| session.start) {
        Some(start) if start > now => {
            job.sessions.pop();
            start
        }
        _ => {
            job.close_open_session(now);
            now
        }
    }
}

fn pause_started_at(job: &Job) -> DateTime<Utc> {
    let session_end = job.sessions.last().and_then(|session| session.end);
    let break_end = job.breaks.last().map(|interval| interval.end);
    session_end
        .max(break_end)
        .unwrap_or_else(|| job.updated_at())
}

fn whole_minutes(duration: Duration) -> u32 {
    u32::try_from(duration.num_minutes().max(0)).unwrap_or(u32::MAX)
}

fn validate_quantity(quantity: u32) -> Result<(), TransitionError> {
    if quantity == 0 {
        return Err(TransitionError::Validation(
            "itemQuantity must be >= 1".to_string(),
        ));
    }
    Ok(())
}
