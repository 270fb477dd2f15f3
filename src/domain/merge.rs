use crate::domain::models::{AppState, Job};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub drawing_number: String,
    pub item_quantity: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobKey {
    pub fn of(job: &Job) -> Self {
        Self {
            drawing_number: job.drawing_number.clone(),
            item_quantity: job.item_quantity,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Reconciles two copies of the tracker state.
///
/// The active job goes to whichever side updated it last (local on ties).
/// Completed jobs are unioned by [`JobKey`] and sorted newest first.
/// `last_sync` is always stamped with `now`.
pub fn merge(local: &AppState, remote: &AppState, now: DateTime<Utc>) -> AppState {
    AppState {
        active_job: resolve_active_job(local.active_job.as_ref(), remote.active_job.as_ref()),
        completed_jobs: merge_completed_jobs(&local.completed_jobs, &remote.completed_jobs),
        last_sync: Some(now),
    }
}

pub fn resolve_active_job(local: Option<&Job>, remote: Option<&Job>) -> Option<Job> {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            if remote.updated_at() > local.updated_at() {
                Some(remote.clone())
            } else {
                Some(local.clone())
            }
        }
        (Some(local), None) => Some(local.clone()),
        (None, Some(remote)) => Some(remote.clone()),
        (None, None) => None,
    }
}

pub fn merge_completed_jobs(local: &[Job], remote: &[Job]) -> Vec<Job> {
    let mut merged: Vec<Job> = Vec::with_capacity(local.len() + remote.len());
    let mut index_by_key: HashMap<JobKey, usize> = HashMap::new();

    for job in local.iter().chain(remote) {
        let key = JobKey::of(job);
        match index_by_key.get(&key) {
            Some(&index) => {
                if prefer(job, &merged[index]) == Ordering::Greater {
                    merged[index] = job.clone();
                }
            }
            None => {
                index_by_key.insert(key, merged.len());
                merged.push(job.clone());
            }
        }
    }

    // Stable: equal completion times keep local-before-remote order.
    merged.sort_by(|left, right| match (left.completed_at, right.completed_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    merged
}

fn prefer(candidate: &Job, current: &Job) -> Ordering {
    revision_time(candidate)
        .cmp(&revision_time(current))
        .then_with(|| candidate.sessions.len().cmp(&current.sessions.len()))
        .then_with(|| candidate.total_time_minutes.cmp(&current.total_time_minutes))
}

fn revision_time(job: &Job) -> DateTime<Utc> {
    job.last_updated
        .or(job.completed_at)
        .unwrap_or(job.started_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{JobStatus, WorkSession};
    use chrono::Duration;
    use proptest::prelude::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn completed(drawing_number: &str, started: &str, finished: &str, total: u32) -> Job {
        let mut job = Job::new(drawing_number, "", 1, at(started));
        job.close_open_session(at(finished));
        job.status = JobStatus::Completed;
        job.completed_at = Some(at(finished));
        job.last_updated = Some(at(finished));
        job.total_time_minutes = total;
        job
    }

    fn active(drawing_number: &str, updated: &str) -> Job {
        let mut job = Job::new(drawing_number, "", 1, at("2026-02-16T00:00:00Z"));
        job.last_updated = Some(at(updated));
        job
    }

    fn state(active_job: Option<Job>, completed_jobs: Vec<Job>) -> AppState {
        AppState {
            active_job,
            completed_jobs,
            last_sync: None,
        }
    }

    #[test]
    fn later_updated_remote_active_job_wins() {
        let local = state(Some(active("X", "2026-02-16T01:00:00Z")), Vec::new());
        let remote = state(Some(active("Y", "2026-02-16T02:00:00Z")), Vec::new());

        let merged = merge(&local, &remote, at("2026-02-16T03:00:00Z"));
        assert_eq!(merged.active_job.map(|job| job.drawing_number), Some("Y".to_string()));
    }

    #[test]
    fn active_job_tie_favors_local() {
        let local = state(Some(active("X", "2026-02-16T01:00:00Z")), Vec::new());
        let remote = state(Some(active("Y", "2026-02-16T01:00:00Z")), Vec::new());

        let merged = merge(&local, &remote, at("2026-02-16T03:00:00Z"));
        assert_eq!(merged.active_job.map(|job| job.drawing_number), Some("X".to_string()));
    }

    #[test]
    fn active_job_from_either_side_survives() {
        let now = at("2026-02-16T03:00:00Z");
        let with_job = state(Some(active("X", "2026-02-16T01:00:00Z")), Vec::new());
        let empty = AppState::default();

        assert!(merge(&with_job, &empty, now).active_job.is_some());
        assert!(merge(&empty, &with_job, now).active_job.is_some());
        assert!(merge(&empty, &empty, now).active_job.is_none());
    }

    #[test]
    fn legacy_active_job_falls_back_to_started_at() {
        let mut legacy = Job::new("OLD", "", 1, at("2026-02-16T05:00:00Z"));
        legacy.last_updated = None;
        let newer = active("NEW", "2026-02-16T04:00:00Z");

        let resolved = resolve_active_job(Some(&newer), Some(&legacy));
        assert_eq!(resolved.map(|job| job.drawing_number), Some("OLD".to_string()));
    }

    #[test]
    fn duplicate_completed_job_keeps_larger_total() {
        let local_copy = completed("D-1", "2026-02-16T00:00:00Z", "2026-02-16T02:00:00Z", 100);
        let remote_copy = completed("D-1", "2026-02-16T00:00:00Z", "2026-02-16T02:00:00Z", 120);

        let merged = merge_completed_jobs(&[local_copy], &[remote_copy]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].total_time_minutes, 120);
    }

    #[test]
    fn duplicate_completed_job_prefers_later_update_over_total() {
        let mut local_copy = completed("D-1", "2026-02-16T00:00:00Z", "2026-02-16T02:00:00Z", 200);
        let mut remote_copy = local_copy.clone();
        local_copy.last_updated = Some(at("2026-02-16T02:00:00Z"));
        remote_copy.last_updated = Some(at("2026-02-16T02:30:00Z"));
        remote_copy.total_time_minutes = 90;

        let merged = merge_completed_jobs(&[local_copy], &[remote_copy]);
        assert_eq!(merged[0].total_time_minutes, 90);
    }

    #[test]
    fn duplicate_completed_job_prefers_more_sessions_when_simultaneous() {
        let local_copy = completed("D-1", "2026-02-16T00:00:00Z", "2026-02-16T02:00:00Z", 120);
        let mut remote_copy = local_copy.clone();
        remote_copy.sessions = vec![
            WorkSession::closed(at("2026-02-16T00:00:00Z"), at("2026-02-16T01:00:00Z")),
            WorkSession::closed(at("2026-02-16T01:10:00Z"), at("2026-02-16T02:00:00Z")),
        ];
        remote_copy.total_time_minutes = 110;

        let merged = merge_completed_jobs(&[local_copy], &[remote_copy]);
        assert_eq!(merged[0].sessions.len(), 2);
    }

    #[test]
    fn completed_jobs_are_unioned_newest_first() {
        let older = completed("A", "2026-02-14T00:00:00Z", "2026-02-14T03:00:00Z", 180);
        let middle = completed("B", "2026-02-15T00:00:00Z", "2026-02-15T03:00:00Z", 180);
        let newest = completed("C", "2026-02-16T00:00:00Z", "2026-02-16T03:00:00Z", 180);

        let merged = merge_completed_jobs(&[older.clone(), newest.clone()], &[middle.clone()]);
        let order: Vec<&str> = merged.iter().map(|job| job.drawing_number.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
    }

    #[test]
    fn last_sync_is_always_now() {
        let now = at("2026-02-16T09:00:00Z");
        let mut local = AppState::default();
        local.last_sync = Some(at("2020-01-01T00:00:00Z"));
        assert_eq!(merge(&local, &AppState::default(), now).last_sync, Some(now));
    }

    proptest! {
        #[test]
        fn merging_a_state_with_itself_is_identity(
            offsets in proptest::collection::btree_set(0i64..10_000, 0..12),
            totals in proptest::collection::vec(0u32..600, 12),
            with_active in any::<bool>()
        ) {
            let origin = at("2026-01-01T00:00:00Z");
            // Newest first, as the lifecycle stores them.
            let jobs: Vec<Job> = offsets
                .iter()
                .rev()
                .zip(&totals)
                .map(|(offset, total)| {
                    let start = origin + Duration::hours(*offset);
                    let end = start + Duration::minutes(i64::from(*total));
                    let mut job = Job::new(format!("D-{offset}"), "", 1, start);
                    job.close_open_session(end);
                    job.status = JobStatus::Completed;
                    job.completed_at = Some(end);
                    job.total_time_minutes = *total;
                    job
                })
                .collect();
            let active_job = with_active.then(|| active("RUN", "2026-03-01T00:00:00Z"));
            let original = state(active_job, jobs);
            let now = at("2026-04-01T00:00:00Z");

            let merged = merge(&original, &original, now);
            prop_assert_eq!(merged.active_job, original.active_job);
            prop_assert_eq!(merged.completed_jobs, original.completed_jobs);
        }

        #[test]
        fn completed_jobs_merge_in_either_order(
            offsets in proptest::collection::btree_set(0i64..10_000, 0..12),
            totals in proptest::collection::vec(0u32..60, 12),
            sides in proptest::collection::vec(0u8..3, 12)
        ) {
            let origin = at("2026-01-01T00:00:00Z");
            let mut local = Vec::new();
            let mut remote = Vec::new();
            for ((offset, total), side) in offsets.iter().zip(&totals).zip(&sides) {
                let start = origin + Duration::hours(*offset);
                let end = start + Duration::minutes(i64::from(*total));
                let mut job = Job::new(format!("D-{offset}"), "", 1, start);
                job.close_open_session(end);
                job.status = JobStatus::Completed;
                job.completed_at = Some(end);
                job.total_time_minutes = *total;
                match side {
                    0 => local.push(job),
                    1 => remote.push(job),
                    _ => {
                        local.push(job.clone());
                        remote.push(job);
                    }
                }
            }
            let now = at("2026-04-01T00:00:00Z");
            let a = state(None, local);
            let b = state(None, remote);

            prop_assert_eq!(merge(&a, &b, now).completed_jobs, merge(&b, &a, now).completed_jobs);
        }
    }
}
