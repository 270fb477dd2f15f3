pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::{
    ChangeReason, ResetResponse, StateChange, SyncResponse, TickOutcome, TrackerApp,
};
pub use application::ticker::Ticker;
pub use domain::lifecycle::{StartOutcome, TransitionError};
pub use domain::models::{AppState, BreakInterval, Job, JobStatus, WorkSession};
pub use domain::time_accounting::BusinessHours;
pub use infrastructure::error::{InfraError, RemoteError};

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Opens the tracker in `workspace_root`. A job left running keeps being
/// ticked while the returned handle is alive.
pub fn launch(workspace_root: impl AsRef<Path>) -> Result<Arc<TrackerApp>, InfraError> {
    let app = TrackerApp::open(workspace_root.as_ref())?;
    tracing::info!(
        workspace_root = %app.workspace_root().display(),
        ticking = app.is_ticking(),
        "tracker opened"
    );
    Ok(app)
}
