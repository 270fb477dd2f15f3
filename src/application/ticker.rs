use crate::application::commands::{tick, TickOutcome, TrackerApp};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background driver calling [`tick`] once per period. It holds the tracker
/// weakly and ends once the last `Arc<TrackerApp>` is gone.
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Panics outside a Tokio runtime, like `tokio::spawn`.
    pub fn spawn(app: &Arc<TrackerApp>, period: Duration) -> Self {
        Self::spawn_on(&Handle::current(), app, period)
    }

    pub(crate) fn spawn_on(runtime: &Handle, app: &Arc<TrackerApp>, period: Duration) -> Self {
        let handle = runtime.spawn(run(Arc::downgrade(app), period));
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(app: Weak<TrackerApp>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(app) = app.upgrade() else {
            tracing::debug!("tracker dropped; ticker stopped");
            break;
        };
        match tick(&app) {
            Ok(TickOutcome::AutoPaused) => tracing::info!("active job auto-paused by ticker"),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::tests::{TempWorkspace, TestClock};
    use crate::application::commands::{get_state, start_job, subscribe, ChangeReason, StateChange};
    use crate::domain::models::JobStatus;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::infrastructure::state_repository::InMemoryStateRepository;
    use tokio::sync::watch;
    use tokio::time::timeout;

    fn tracker(workspace: &TempWorkspace, clock: &TestClock) -> TrackerApp {
        TrackerApp::new(
            &workspace.path,
            Arc::new(InMemoryStateRepository::default()),
            Arc::new(InMemoryCredentialStore::default()),
        )
        .expect("initialize tracker")
        .with_now_provider(clock.provider())
        .with_tick_interval(Duration::from_millis(5))
    }

    async fn wait_for(changes: &mut watch::Receiver<StateChange>, reason: ChangeReason) {
        timeout(Duration::from_secs(5), async {
            loop {
                changes.changed().await.expect("sender alive");
                if changes.borrow_and_update().reason == reason {
                    break;
                }
            }
        })
        .await
        .expect("change within timeout");
    }

    #[tokio::test]
    async fn manual_ticker_auto_pauses_after_end_of_day() {
        let workspace = TempWorkspace::new();
        let clock = TestClock::at("2026-02-16T16:58:00");
        let app = Arc::new(tracker(&workspace, &clock));
        start_job(&app, "D-100".to_string(), None, None, false).expect("start job");
        assert!(!app.is_ticking());
        let mut changes = subscribe(&app);
        clock.set("2026-02-16T17:00:00");

        let ticker = Ticker::spawn(&app, Duration::from_millis(5));
        wait_for(&mut changes, ChangeReason::AutoPaused).await;

        let job = get_state(&app).expect("state").active_job.expect("job stays active");
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.total_time_minutes, 2);
        assert!(!ticker.is_finished());
        ticker.stop();
    }

    #[tokio::test]
    async fn starting_a_job_on_a_shared_tracker_drives_auto_pause() {
        let workspace = TempWorkspace::new();
        let clock = TestClock::at("2026-02-16T16:58:00");
        let app = tracker(&workspace, &clock).into_shared();
        let mut changes = subscribe(&app);

        start_job(&app, "D-100".to_string(), None, None, false).expect("start job");
        assert!(app.is_ticking());
        clock.set("2026-02-16T17:00:00");
        wait_for(&mut changes, ChangeReason::AutoPaused).await;

        let job = get_state(&app).expect("state").active_job.expect("job stays active");
        assert_eq!(job.status, JobStatus::Paused);
    }

    #[test]
    fn tracker_shared_outside_a_runtime_starts_ticking_with_the_first_job() {
        let workspace = TempWorkspace::new();
        let clock = TestClock::at("2026-02-16T16:58:00");
        let app = tracker(&workspace, &clock).into_shared();
        assert!(!app.is_ticking());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let mut changes = subscribe(&app);
            start_job(&app, "D-100".to_string(), None, None, false).expect("start job");
            assert!(app.is_ticking());
            clock.set("2026-02-16T17:00:00");
            wait_for(&mut changes, ChangeReason::AutoPaused).await;
        });
    }

    #[tokio::test]
    async fn ticker_ends_when_tracker_is_dropped() {
        let workspace = TempWorkspace::new();
        let clock = TestClock::at("2026-02-16T09:00:00");
        let app = Arc::new(tracker(&workspace, &clock));
        let ticker = Ticker::spawn(&app, Duration::from_millis(5));
        drop(app);

        timeout(Duration::from_secs(5), async {
            while !ticker.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("ticker finishes");
    }
}
