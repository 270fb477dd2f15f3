use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::sync::{RetryPolicy, SyncService};
use crate::application::ticker::Ticker;
use crate::application::NowProvider;
use crate::domain::lifecycle::{NewJob, StartOutcome, TransitionError};
use crate::domain::models::{AppState, Job};
use crate::domain::stats::{self, MonthCount, MonthlySummary};
use crate::domain::time_accounting::BusinessHours;
use crate::domain::views::{self, ActiveJobView, CompletedJobRow};
use crate::infrastructure::config::{
    self, read_business_hours, read_recognition_api_url, read_remote_settings, read_tick_interval,
    RemoteSettings,
};
use crate::infrastructure::credential_store::{
    resolve_access_token, CredentialStore, KeyringCredentialStore, ACCESS_TOKEN_ENV,
};
use crate::infrastructure::error::{InfraError, RemoteError};
use crate::infrastructure::github_client::{GitHubContentsClient, RemoteBlobStore};
use crate::infrastructure::recognition_client::{
    DrawingHints, DrawingRecognizer, ReqwestDrawingRecognizer,
};
use crate::infrastructure::state_repository::{SqliteStateRepository, StateRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

pub type RemoteStoreFactory = Arc<dyn Fn(&RemoteSettings) -> Arc<dyn RemoteBlobStore> + Send + Sync>;
pub type RecognizerFactory = Arc<dyn Fn(&str) -> Arc<dyn DrawingRecognizer> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Loaded,
    Started,
    Paused,
    Resumed,
    BreakAdded,
    Completed,
    AutoPaused,
    Tick,
    Synced,
    Reset,
}

impl ChangeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::BreakAdded => "break_added",
            Self::Completed => "completed",
            Self::AutoPaused => "auto_paused",
            Self::Tick => "tick",
            Self::Synced => "synced",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub revision: u64,
    pub reason: ChangeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Idle,
    Skipped,
    AutoPaused,
    Refreshed { total_minutes: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub created_remote: bool,
    pub revision: String,
    pub active_drawing_number: Option<String>,
    pub completed_jobs: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub remote_reset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

pub struct TrackerApp {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    logs_dir: PathBuf,
    hours: BusinessHours,
    tick_interval: Duration,
    repository: Arc<dyn StateRepository>,
    credentials: Arc<dyn CredentialStore>,
    remote_store_factory: RemoteStoreFactory,
    recognizer_factory: RecognizerFactory,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    state: Mutex<AppState>,
    sync_in_flight: AtomicBool,
    changes: watch::Sender<StateChange>,
    log_guard: Mutex<()>,
    self_handle: Weak<TrackerApp>,
    ticker: Mutex<Option<Ticker>>,
}

impl TrackerApp {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Arc<Self>, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root.as_ref())?;
        let repository = Arc::new(SqliteStateRepository::new(&bootstrap.database_path));
        let app = Self::from_bootstrap(
            bootstrap,
            repository,
            Arc::new(KeyringCredentialStore::default()),
        )?;
        Ok(app.into_shared())
    }

    pub fn new(
        workspace_root: impl AsRef<Path>,
        repository: Arc<dyn StateRepository>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root.as_ref())?;
        Self::from_bootstrap(bootstrap, repository, credentials)
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        repository: Arc<dyn StateRepository>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let hours = read_business_hours(&bootstrap.config_dir)?;
        let tick_interval = read_tick_interval(&bootstrap.config_dir)?;

        let state = repository.load()?;
        if let Err(message) = state.validate() {
            tracing::warn!(%message, "stored tracker data failed validation; loaded as-is");
        }
        tracing::info!(
            workspace_root = %bootstrap.workspace_root.display(),
            active_job = state.active_job.is_some(),
            completed_jobs = state.completed_jobs.len(),
            "tracker state loaded"
        );
        let (changes, _) = watch::channel(StateChange {
            revision: 0,
            reason: ChangeReason::Loaded,
        });

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            hours,
            tick_interval,
            repository,
            credentials,
            remote_store_factory: Arc::new(|settings: &RemoteSettings| {
                Arc::new(GitHubContentsClient::new(settings)) as Arc<dyn RemoteBlobStore>
            }),
            recognizer_factory: Arc::new(|api_url: &str| {
                Arc::new(ReqwestDrawingRecognizer::new(api_url)) as Arc<dyn DrawingRecognizer>
            }),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            state: Mutex::new(state),
            sync_in_flight: AtomicBool::new(false),
            changes,
            log_guard: Mutex::new(()),
            self_handle: Weak::new(),
            ticker: Mutex::new(None),
        })
    }

    /// Shares the tracker and starts its ticker. Outside a Tokio runtime the
    /// ticker starts with the next job instead.
    pub fn into_shared(self) -> Arc<Self> {
        let app = Arc::new_cyclic(move |handle| {
            let mut app = self;
            app.self_handle = handle.clone();
            app
        });
        app.ensure_ticker();
        app
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_remote_store_factory(mut self, factory: RemoteStoreFactory) -> Self {
        self.remote_store_factory = factory;
        self
    }

    pub fn with_recognizer_factory(mut self, factory: RecognizerFactory) -> Self {
        self.recognizer_factory = factory;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn business_hours(&self) -> &BusinessHours {
        &self.hours
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .map(|ticker| ticker.as_ref().is_some_and(|running| !running.is_finished()))
            .unwrap_or(false)
    }

    fn ensure_ticker(&self) {
        let Some(app) = self.self_handle.upgrade() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("no Tokio runtime; ticker not started");
            return;
        };
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if ticker.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        *ticker = Some(Ticker::spawn_on(&runtime, &app, self.tick_interval));
        tracing::debug!(period_ms = self.tick_interval.as_millis() as u64, "ticker started");
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, AppState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("state lock poisoned: {error}")))
    }

    fn notify(&self, reason: ChangeReason) {
        self.changes.send_modify(|change| {
            change.revision = change.revision.wrapping_add(1);
            change.reason = reason;
        });
    }

    fn transition<T, F>(&self, command: &str, mutate: F) -> Result<T, InfraError>
    where
        F: FnOnce(&mut AppState, DateTime<Utc>, &BusinessHours) -> Result<(T, Option<ChangeReason>), TransitionError>,
    {
        let (value, change) = {
            let mut state = self.lock_state().map_err(|error| self.command_failed(command, error))?;
            if self.is_syncing() {
                return Err(self.command_failed(command, InfraError::SyncInProgress));
            }
            let now = self.now();
            let (value, reason) = mutate(&mut state, now, &self.hours)
                .map_err(|error| self.command_failed(command, error.into()))?;
            let change = reason.map(|reason| (reason, self.repository.save(&state), describe(&state)));
            (value, change)
        };

        let Some((reason, saved, summary)) = change else {
            self.log_info(command, "no change");
            return Ok(value);
        };
        self.notify(reason);
        if reason == ChangeReason::Started {
            self.ensure_ticker();
        }
        match saved {
            Ok(()) => {
                tracing::info!(command, reason = reason.as_str(), %summary, "transition applied");
                self.log_info(command, &format!("{} {summary}", reason.as_str()));
                Ok(value)
            }
            Err(error) => Err(self.command_failed(command, error)),
        }
    }

    /// Marks a sync as in flight and snapshots the state under the same lock,
    /// so no transition can land between the snapshot and the flag.
    fn begin_sync(&self) -> Result<(SyncGuard<'_>, AppState), InfraError> {
        let state = self.lock_state()?;
        if self.sync_in_flight.swap(true, Ordering::SeqCst) {
            return Err(InfraError::SyncInProgress);
        }
        Ok((
            SyncGuard {
                flag: &self.sync_in_flight,
            },
            state.clone(),
        ))
    }

    fn remote_context(&self) -> Result<(RemoteSettings, String), InfraError> {
        let settings = read_remote_settings(&self.config_dir)?;
        if !settings.is_configured() {
            return Err(RemoteError::NotConfigured("remote owner and repo must be set".to_string()).into());
        }
        let token = resolve_access_token(self.credentials.as_ref(), |key| std::env::var(key).ok())?
            .ok_or_else(|| {
                RemoteError::NotConfigured(format!(
                    "no access token stored and {ACCESS_TOKEN_ENV} is not set"
                ))
            })?;
        Ok((settings, token))
    }

    fn sync_service(&self) -> Result<SyncService<dyn RemoteBlobStore>, InfraError> {
        let (settings, token) = self.remote_context()?;
        let remote = (self.remote_store_factory)(&settings);
        Ok(SyncService::new(remote, token, settings.data_file_path)
            .with_retry_policy(self.retry_policy.clone())
            .with_now_provider(Arc::clone(&self.now_provider)))
    }

    fn command_failed(&self, command: &str, error: InfraError) -> InfraError {
        tracing::warn!(command, %error, "command failed");
        self.log_error(command, &error.to_string());
        error
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": self.now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn describe(state: &AppState) -> String {
    match &state.active_job {
        Some(job) => format!(
            "drawing_number={} status={} total_minutes={} completed_jobs={}",
            job.drawing_number,
            job.status.as_str(),
            job.total_time_minutes,
            state.completed_jobs.len()
        ),
        None => format!("no active job, completed_jobs={}", state.completed_jobs.len()),
    }
}

fn start_reason(outcome: &StartOutcome) -> Option<ChangeReason> {
    match outcome {
        StartOutcome::Started { .. } => Some(ChangeReason::Started),
        StartOutcome::ConfirmationRequired { .. } => None,
    }
}

/// Starts a new job. With a job already active, nothing happens unless
/// `confirm_replace` is set, in which case that job is completed first.
pub fn start_job(
    app: &TrackerApp,
    drawing_number: String,
    description: Option<String>,
    item_quantity: Option<u32>,
    confirm_replace: bool,
) -> Result<StartOutcome, InfraError> {
    let request = NewJob {
        drawing_number,
        description: description.unwrap_or_default(),
        item_quantity: item_quantity.unwrap_or(1),
    };
    app.transition("start_job", |state, now, hours| {
        let outcome = state.start_job(request, confirm_replace, now, hours)?;
        let reason = start_reason(&outcome);
        Ok((outcome, reason))
    })
}

pub fn restart_job(
    app: &TrackerApp,
    index: usize,
    item_quantity: Option<u32>,
    confirm_replace: bool,
) -> Result<StartOutcome, InfraError> {
    app.transition("restart_job", |state, now, hours| {
        let outcome = state.restart_job(index, item_quantity, confirm_replace, now, hours)?;
        let reason = start_reason(&outcome);
        Ok((outcome, reason))
    })
}

pub fn pause_job(app: &TrackerApp) -> Result<Job, InfraError> {
    app.transition("pause_job", |state, now, hours| {
        let job = state.pause_job(now, hours)?.clone();
        Ok((job, Some(ChangeReason::Paused)))
    })
}

pub fn resume_job(app: &TrackerApp) -> Result<Job, InfraError> {
    app.transition("resume_job", |state, now, hours| {
        let job = state.resume_job(now, hours)?.clone();
        Ok((job, Some(ChangeReason::Resumed)))
    })
}

pub fn toggle_pause(app: &TrackerApp) -> Result<Job, InfraError> {
    app.transition("toggle_pause", |state, now, hours| {
        let job = state.toggle_pause(now, hours)?.clone();
        let reason = if job.is_paused() {
            ChangeReason::Paused
        } else {
            ChangeReason::Resumed
        };
        Ok((job, Some(reason)))
    })
}

pub fn add_manual_break(app: &TrackerApp, minutes: i64) -> Result<Job, InfraError> {
    app.transition("add_manual_break", |state, now, hours| {
        let job = state.add_manual_break(minutes, now, hours)?.clone();
        Ok((job, Some(ChangeReason::BreakAdded)))
    })
}

pub fn complete_job(app: &TrackerApp) -> Result<Job, InfraError> {
    app.transition("complete_job", |state, now, hours| {
        let job = state.complete_job(now, hours)?;
        Ok((job, Some(ChangeReason::Completed)))
    })
}

pub fn tick(app: &TrackerApp) -> Result<TickOutcome, InfraError> {
    let (saved, summary) = {
        let mut state = app.lock_state()?;
        if app.is_syncing() {
            return Ok(TickOutcome::Skipped);
        }
        if state.active_job.is_none() {
            return Ok(TickOutcome::Idle);
        }

        let now = app.now();
        if !state.auto_pause_if_due(now, &app.hours) {
            let before = state.active_job.as_ref().map(|job| job.total_time_minutes);
            let total_minutes = state.refresh_running_total(now, &app.hours).unwrap_or_default();
            if before != Some(total_minutes) {
                app.notify(ChangeReason::Tick);
            }
            return Ok(TickOutcome::Refreshed { total_minutes });
        }
        (app.repository.save(&state), describe(&state))
    };

    app.notify(ChangeReason::AutoPaused);
    tracing::info!(%summary, "job auto-paused at end of day");
    saved.map_err(|error| app.command_failed("tick", error))?;
    app.log_info("tick", &format!("auto_paused {summary}"));
    Ok(TickOutcome::AutoPaused)
}

pub fn get_state(app: &TrackerApp) -> Result<AppState, InfraError> {
    Ok(app.lock_state()?.clone())
}

pub fn active_job_view(app: &TrackerApp) -> Result<Option<ActiveJobView>, InfraError> {
    let state = app.lock_state()?;
    let now = app.now();
    Ok(state
        .active_job
        .as_ref()
        .map(|job| views::active_job_view(job, now, &app.hours)))
}

pub fn list_completed_jobs(app: &TrackerApp) -> Result<Vec<CompletedJobRow>, InfraError> {
    let state = app.lock_state()?;
    Ok(views::completed_job_rows(&state.completed_jobs, &app.hours))
}

pub fn available_months(app: &TrackerApp) -> Result<Vec<MonthCount>, InfraError> {
    let state = app.lock_state()?;
    Ok(stats::available_months(&state.completed_jobs, &app.hours))
}

pub fn monthly_summary(app: &TrackerApp, year: i32, month: u32) -> Result<MonthlySummary, InfraError> {
    if !(1..=12).contains(&month) {
        return Err(app.command_failed(
            "monthly_summary",
            InfraError::InvalidConfig(format!("month must be 1-12, got {month}")),
        ));
    }
    let state = app.lock_state()?;
    Ok(stats::monthly_summary(&state.completed_jobs, year, month, &app.hours))
}

/// Merges local and remote data, writes the result to both stores and only
/// then replaces the in-memory state.
///
/// The remote write lands before the local save. When that save fails the
/// remote already holds the merged document while local data is unchanged;
/// the next sync converges because merging a state with its own merge result
/// changes nothing but `lastSync`.
pub async fn sync_with_github(app: &TrackerApp) -> Result<SyncResponse, InfraError> {
    let (_guard, snapshot) = app
        .begin_sync()
        .map_err(|error| app.command_failed("sync_with_github", error))?;

    let result = async {
        let service = app.sync_service()?;
        let outcome = service.sync(&snapshot).await?;
        app.repository.save(&outcome.merged)?;
        Ok::<_, InfraError>(outcome)
    }
    .await;
    let outcome = result.map_err(|error| app.command_failed("sync_with_github", InfraError::sync_failed(error)))?;

    {
        let mut state = app.lock_state()?;
        *state = outcome.merged.clone();
    }
    app.notify(ChangeReason::Synced);
    app.ensure_ticker();

    let response = SyncResponse {
        created_remote: outcome.created_remote,
        revision: outcome.revision,
        active_drawing_number: outcome
            .merged
            .active_job
            .as_ref()
            .map(|job| job.drawing_number.clone()),
        completed_jobs: outcome.merged.completed_jobs.len(),
        last_sync: outcome.merged.last_sync,
    };
    app.log_info(
        "sync_with_github",
        &format!(
            "synchronized revision={} created={} completed_jobs={}",
            response.revision, response.created_remote, response.completed_jobs
        ),
    );
    Ok(response)
}

pub async fn load_remote_data(app: &TrackerApp) -> Result<AppState, InfraError> {
    let result = async {
        let service = app.sync_service()?;
        service.load_remote().await
    }
    .await;
    result.map_err(|error| app.command_failed("load_remote_data", error))
}

pub async fn reset_all_data(app: &TrackerApp) -> Result<ResetResponse, InfraError> {
    let (_guard, _) = app
        .begin_sync()
        .map_err(|error| app.command_failed("reset_all_data", error))?;

    app.repository
        .clear()
        .map_err(|error| app.command_failed("reset_all_data", error))?;
    {
        let mut state = app.lock_state()?;
        *state = AppState::reset_at(app.now());
    }
    app.notify(ChangeReason::Reset);
    app.log_info("reset_all_data", "local data cleared");

    let remote = async {
        let service = app.sync_service()?;
        service.force_reset().await
    }
    .await;
    let response = match remote {
        Ok(_) => ResetResponse {
            remote_reset: true,
            remote_error: None,
        },
        Err(InfraError::Remote(RemoteError::NotConfigured(message))) => {
            app.log_info("reset_all_data", &format!("remote reset skipped: {message}"));
            ResetResponse {
                remote_reset: false,
                remote_error: None,
            }
        }
        Err(error) => {
            let error = app.command_failed("reset_all_data", error);
            ResetResponse {
                remote_reset: false,
                remote_error: Some(error.to_string()),
            }
        }
    };
    Ok(response)
}

/// Saves repository settings. `access_token`: `None` keeps the stored
/// token, a blank string removes it, anything else replaces it.
pub fn save_remote_settings(
    app: &TrackerApp,
    settings: RemoteSettings,
    access_token: Option<String>,
) -> Result<RemoteSettings, InfraError> {
    let result = (|| {
        let saved = config::save_remote_settings(&app.config_dir, &settings)?;
        match access_token.as_deref().map(str::trim) {
            Some("") => app.credentials.delete_token()?,
            Some(token) => app.credentials.save_token(token)?,
            None => {}
        }
        Ok::<_, InfraError>(saved)
    })();
    let saved = result.map_err(|error| app.command_failed("save_remote_settings", error))?;
    app.log_info(
        "save_remote_settings",
        &format!("saved remote {}/{} path={}", saved.owner, saved.repo, saved.data_file_path),
    );
    Ok(saved)
}

pub async fn test_remote_connection(app: &TrackerApp) -> Result<String, InfraError> {
    let result = async {
        let (settings, token) = app.remote_context()?;
        let remote = (app.remote_store_factory)(&settings);
        Ok::<_, InfraError>(remote.test_connection(&token).await?)
    }
    .await;
    let full_name = result.map_err(|error| app.command_failed("test_remote_connection", error))?;
    app.log_info("test_remote_connection", &format!("connected to {full_name}"));
    Ok(full_name)
}

pub async fn recognize_drawing(app: &TrackerApp, image: &[u8]) -> Result<DrawingHints, InfraError> {
    let result = async {
        let api_url = read_recognition_api_url(&app.config_dir)?;
        let recognizer = (app.recognizer_factory)(&api_url);
        recognizer.extract(image).await
    }
    .await;
    let hints = result.map_err(|error| app.command_failed("recognize_drawing", error))?;
    app.log_info(
        "recognize_drawing",
        &format!("drawing_number={:?}", hints.drawing_number),
    );
    Ok(hints)
}

pub async fn test_recognition_connection(app: &TrackerApp) -> Result<bool, InfraError> {
    let result = async {
        let api_url = read_recognition_api_url(&app.config_dir)?;
        let recognizer = (app.recognizer_factory)(&api_url);
        recognizer.test_connection().await
    }
    .await;
    let reachable = result.map_err(|error| app.command_failed("test_recognition_connection", error))?;
    app.log_info("test_recognition_connection", &format!("reachable={reachable}"));
    Ok(reachable)
}

pub fn persist_now(app: &TrackerApp) -> Result<(), InfraError> {
    let state = app.lock_state()?;
    app.repository
        .save(&state)
        .map_err(|error| app.command_failed("persist_now", error))?;
    drop(state);
    app.log_info("persist_now", "state persisted");
    Ok(())
}

pub fn subscribe(app: &TrackerApp) -> watch::Receiver<StateChange> {
    app.changes.subscribe()
}
