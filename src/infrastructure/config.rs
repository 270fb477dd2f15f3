use crate::domain::time_accounting::BusinessHours;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const REMOTE_JSON: &str = "remote.json";
const RECOGNITION_JSON: &str = "recognition.json";

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_DATA_FILE_PATH: &str = "lathe-time-data.json";
const DEFAULT_RECOGNITION_API_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessHoursSettings {
    pub lunch_start: String,
    pub lunch_end: String,
    pub end_of_day: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_data_file_path")]
    pub data_file_path: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            owner: String::new(),
            repo: String::new(),
            data_file_path: default_data_file_path(),
        }
    }
}

impl RemoteSettings {
    pub fn is_configured(&self) -> bool {
        !self.owner.trim().is_empty() && !self.repo.trim().is_empty()
    }

    fn normalized(&self) -> Result<Self, InfraError> {
        let api_base = self.api_base.trim().trim_end_matches('/');
        url::Url::parse(api_base).map_err(|error| {
            InfraError::InvalidConfig(format!("remote.apiBase '{api_base}' is not a URL: {error}"))
        })?;
        let data_file_path = self.data_file_path.trim().trim_start_matches('/');
        if data_file_path.is_empty() {
            return Err(InfraError::InvalidConfig(
                "remote.dataFilePath must not be empty".to_string(),
            ));
        }
        Ok(Self {
            api_base: api_base.to_string(),
            owner: self.owner.trim().to_string(),
            repo: self.repo.trim().to_string(),
            data_file_path: data_file_path.to_string(),
        })
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_data_file_path() -> String {
    DEFAULT_DATA_FILE_PATH.to_string()
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "Asia/Tokyo",
                "businessHours": {
                    "lunchStart": "12:00",
                    "lunchEnd": "13:00",
                    "endOfDay": "17:00"
                },
                "tickSeconds": 1
            }),
        ),
        (
            REMOTE_JSON,
            serde_json::json!({
                "schema": 1,
                "apiBase": DEFAULT_API_BASE,
                "owner": "",
                "repo": "",
                "dataFilePath": DEFAULT_DATA_FILE_PATH
            }),
        ),
        (
            RECOGNITION_JSON,
            serde_json::json!({
                "schema": 1,
                "apiUrl": DEFAULT_RECOGNITION_API_URL
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn validate_configs(config_dir: &Path) -> Result<(), InfraError> {
    read_business_hours(config_dir)?;
    read_tick_interval(config_dir)?;
    read_remote_settings(config_dir)?;
    read_recognition_api_url(config_dir)?;
    Ok(())
}

pub fn read_business_hours(config_dir: &Path) -> Result<BusinessHours, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let timezone = app
        .get("timezone")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("Asia/Tokyo");
    let settings = match app.get("businessHours") {
        Some(value) => serde_json::from_value::<BusinessHoursSettings>(value.clone()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid businessHours in {APP_JSON}: {error}"))
        })?,
        None => BusinessHoursSettings {
            lunch_start: "12:00".to_string(),
            lunch_end: "13:00".to_string(),
            end_of_day: "17:00".to_string(),
        },
    };

    BusinessHours::parse(
        timezone,
        &settings.lunch_start,
        &settings.lunch_end,
        &settings.end_of_day,
    )
    .map_err(InfraError::InvalidConfig)
}

pub fn read_tick_interval(config_dir: &Path) -> Result<Duration, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let seconds = match app.get("tickSeconds") {
        None => 1,
        Some(value) => value
            .as_u64()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| InfraError::InvalidConfig("tickSeconds must be a positive integer".to_string()))?,
    };
    Ok(Duration::from_secs(seconds))
}

pub fn read_remote_settings(config_dir: &Path) -> Result<RemoteSettings, InfraError> {
    let remote = read_config(&config_dir.join(REMOTE_JSON))?;
    let settings: RemoteSettings = serde_json::from_value(remote)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {REMOTE_JSON}: {error}")))?;
    settings.normalized()
}

pub fn save_remote_settings(config_dir: &Path, settings: &RemoteSettings) -> Result<RemoteSettings, InfraError> {
    let settings = settings.normalized()?;
    let path = config_dir.join(REMOTE_JSON);
    let mut value = serde_json::to_value(&settings)?;
    let object = value.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("schema".to_string(), serde_json::json!(1));
    write_config(&path, &value)?;
    Ok(settings)
}

pub fn read_recognition_api_url(config_dir: &Path) -> Result<String, InfraError> {
    let recognition = read_config(&config_dir.join(RECOGNITION_JSON))?;
    let api_url = recognition
        .get("apiUrl")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_RECOGNITION_API_URL)
        .trim_end_matches('/');
    url::Url::parse(api_url).map_err(|error| {
        InfraError::InvalidConfig(format!("recognition.apiUrl '{api_url}' is not a URL: {error}"))
    })?;
    Ok(api_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_CONFIG: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_CONFIG.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "lathe-timer-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            ensure_default_configs(&path).expect("write default configs");
            Self { path }
        }

        fn write(&self, name: &str, value: serde_json::Value) {
            write_config(&self.path.join(name), &value).expect("write config");
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_describe_tokyo_business_hours() {
        let dir = TempConfigDir::new();
        assert_eq!(read_business_hours(&dir.path).expect("hours"), BusinessHours::default());
        assert_eq!(read_tick_interval(&dir.path).expect("tick"), Duration::from_secs(1));
        assert!(validate_configs(&dir.path).is_ok());
    }

    #[test]
    fn ensure_default_configs_keeps_existing_files() {
        let dir = TempConfigDir::new();
        dir.write(
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "timezone": "UTC",
                "businessHours": {"lunchStart": "11:30", "lunchEnd": "12:30", "endOfDay": "18:00"}
            }),
        );

        ensure_default_configs(&dir.path).expect("ensure defaults");
        let hours = read_business_hours(&dir.path).expect("hours");
        assert_eq!(hours.timezone, chrono_tz::UTC);
        assert_eq!(hours.end_of_day.to_string(), "18:00:00");
    }

    #[test]
    fn invalid_business_hours_are_rejected() {
        let dir = TempConfigDir::new();
        dir.write(
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "businessHours": {"lunchStart": "13:00", "lunchEnd": "12:00", "endOfDay": "17:00"}
            }),
        );
        assert!(matches!(
            read_business_hours(&dir.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(REMOTE_JSON, serde_json::json!({"schema": 2}));
        match read_remote_settings(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn remote_settings_roundtrip_normalizes_values() {
        let dir = TempConfigDir::new();
        assert!(!read_remote_settings(&dir.path).expect("defaults").is_configured());

        let saved = save_remote_settings(
            &dir.path,
            &RemoteSettings {
                api_base: "https://api.github.com/".to_string(),
                owner: " machinist ".to_string(),
                repo: "shop-data".to_string(),
                data_file_path: "/data/lathe.json".to_string(),
            },
        )
        .expect("save settings");

        let loaded = read_remote_settings(&dir.path).expect("load settings");
        assert_eq!(loaded, saved);
        assert_eq!(loaded.api_base, "https://api.github.com");
        assert_eq!(loaded.owner, "machinist");
        assert_eq!(loaded.data_file_path, "data/lathe.json");
        assert!(loaded.is_configured());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(APP_JSON, serde_json::json!({"schema": 1, "tickSeconds": 0}));
        assert!(read_tick_interval(&dir.path).is_err());
    }

    #[test]
    fn recognition_url_defaults_to_localhost() {
        let dir = TempConfigDir::new();
        assert_eq!(
            read_recognition_api_url(&dir.path).expect("url"),
            "http://localhost:3000"
        );
    }
}
