use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

pub const ACCESS_TOKEN_ENV: &str = "LATHE_TIMER_GITHUB_TOKEN";

pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &str) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<String>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("lathe-timer.github", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        self.entry()?
            .set_password(token)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

/// Stored token first, then the environment. Blank values count as missing.
pub fn resolve_access_token<F>(store: &dyn CredentialStore, lookup: F) -> Result<Option<String>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let stored = store
        .load_token()?
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    if stored.is_some() {
        return Ok(stored);
    }
    Ok(lookup(ACCESS_TOKEN_ENV)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_token_wins_over_environment() {
        let store = InMemoryCredentialStore::with_token("stored");
        let token = resolve_access_token(&store, |_| Some("from-env".to_string())).expect("resolve");
        assert_eq!(token.as_deref(), Some("stored"));
    }

    #[test]
    fn environment_token_is_used_when_store_is_empty() {
        let store = InMemoryCredentialStore::default();
        let token = resolve_access_token(&store, |key| {
            (key == ACCESS_TOKEN_ENV).then(|| " from-env ".to_string())
        })
        .expect("resolve");
        assert_eq!(token.as_deref(), Some("from-env"));
    }

    #[test]
    fn blank_tokens_count_as_missing() {
        let store = InMemoryCredentialStore::with_token("   ");
        let token = resolve_access_token(&store, |_| Some(String::new())).expect("resolve");
        assert_eq!(token, None);
    }

    #[test]
    fn in_memory_store_deletes_token() {
        let store = InMemoryCredentialStore::default();
        store.save_token("abc").expect("save");
        store.delete_token().expect("delete");
        assert_eq!(store.load_token().expect("load"), None);
    }
}
