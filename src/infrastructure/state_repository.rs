use crate::domain::models::AppState;
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const STATE_KEY: &str = "latheTimeTrackerData";

pub trait StateRepository: Send + Sync {
    fn load(&self) -> Result<AppState, InfraError>;
    fn save(&self, state: &AppState) -> Result<(), InfraError>;
    fn clear(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteStateRepository {
    db_path: PathBuf,
}

impl SqliteStateRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl StateRepository for SqliteStateRepository {
    fn load(&self) -> Result<AppState, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(AppState::default());
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, state: &AppState) -> Result<(), InfraError> {
        let payload = serde_json::to_string(state)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![STATE_KEY, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv_store WHERE key = ?1", params![STATE_KEY])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    payload: Mutex<Option<String>>,
}

impl InMemoryStateRepository {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, InfraError> {
        self.payload
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("state store lock poisoned: {error}")))
    }
}

impl StateRepository for InMemoryStateRepository {
    fn load(&self) -> Result<AppState, InfraError> {
        match self.lock()?.as_deref() {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(AppState::default()),
        }
    }

    fn save(&self, state: &AppState) -> Result<(), InfraError> {
        let payload = serde_json::to_string(state)?;
        *self.lock()? = Some(payload);
        Ok(())
    }

    fn clear(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}
