use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod bootstrap;
pub mod commands;
pub mod sync;
pub mod ticker;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
