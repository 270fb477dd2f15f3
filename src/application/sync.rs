use crate::application::NowProvider;
use crate::domain::merge::merge;
use crate::domain::models::AppState;
use crate::infrastructure::error::{InfraError, RemoteError};
use crate::infrastructure::github_client::{RemoteBlobStore, RemoteDocument};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

const CREATE_MESSAGE: &str = "Create lathe time tracking data file";
const UPDATE_MESSAGE: &str = "Update lathe time tracking data";
const RESET_MESSAGE: &str = "Reset lathe time tracking data";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub merged: AppState,
    pub created_remote: bool,
    pub revision: String,
}

/// Reconciles local state with one remote document.
///
/// Reads are retried on network errors; writes are not.
pub struct SyncService<C>
where
    C: RemoteBlobStore + ?Sized,
{
    remote: Arc<C>,
    access_token: String,
    path: String,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C> SyncService<C>
where
    C: RemoteBlobStore + ?Sized,
{
    pub fn new(remote: Arc<C>, access_token: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            remote,
            access_token: access_token.into(),
            path: path.into(),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn sync(&self, local: &AppState) -> Result<SyncOutcome, InfraError> {
        let remote = self.fetch_remote().await?;
        let (remote_state, revision) = match remote {
            Some(document) => (parse_document(&document)?, Some(document.revision)),
            None => (AppState::default(), None),
        };

        let merged = merge(local, &remote_state, (self.now_provider)());
        let message = if revision.is_some() {
            UPDATE_MESSAGE
        } else {
            CREATE_MESSAGE
        };
        let new_revision = self.write_state(&merged, revision.as_deref(), message).await?;
        tracing::info!(
            path = %self.path,
            created = revision.is_none(),
            completed_jobs = merged.completed_jobs.len(),
            "remote document synchronized"
        );

        Ok(SyncOutcome {
            merged,
            created_remote: revision.is_none(),
            revision: new_revision,
        })
    }

    pub async fn load_remote(&self) -> Result<AppState, InfraError> {
        match self.fetch_remote().await? {
            Some(document) => parse_document(&document),
            None => {
                let empty = AppState::reset_at((self.now_provider)());
                self.write_state(&empty, None, CREATE_MESSAGE).await?;
                Ok(empty)
            }
        }
    }

    pub async fn force_reset(&self) -> Result<AppState, InfraError> {
        let revision = match self
            .with_retry(|| self.remote.read(&self.access_token, &self.path))
            .await
        {
            Ok(document) => Some(document.revision),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error.into()),
        };

        let empty = AppState::reset_at((self.now_provider)());
        self.write_state(&empty, revision.as_deref(), RESET_MESSAGE).await?;
        tracing::info!(path = %self.path, "remote document reset");
        Ok(empty)
    }

    async fn fetch_remote(&self) -> Result<Option<RemoteDocument>, InfraError> {
        let exists = self
            .with_retry(|| self.remote.exists(&self.access_token, &self.path))
            .await?;
        if !exists {
            return Ok(None);
        }

        match self
            .with_retry(|| self.remote.read(&self.access_token, &self.path))
            .await
        {
            Ok(document) => Ok(Some(document)),
            // Deleted between the two calls.
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_state(
        &self,
        state: &AppState,
        expected_revision: Option<&str>,
        message: &str,
    ) -> Result<String, InfraError> {
        let content = serde_json::to_string_pretty(state)?;
        let revision = self
            .remote
            .write(&self.access_token, &self.path, &content, expected_revision, message)
            .await?;
        Ok(revision)
    }

    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(attempt, delay_ms = delay, %error, "retrying remote read");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn parse_document(document: &RemoteDocument) -> Result<AppState, InfraError> {
    let state: AppState = serde_json::from_str(&document.content).map_err(|error| {
        RemoteError::InvalidPayload(format!("remote document is not tracker data: {error}"))
    })?;
    Ok(state)
}
