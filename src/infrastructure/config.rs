use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;
const DEFAULT_LANDING_PATH: &str = "/";
const API_URL_KEYS: &[&str] = &["TASKDESK_API_URL", "NEXT_PUBLIC_API_URL"];
const SESSION_SECRET_KEYS: &[&str] = &["TASKDESK_SESSION_SECRET", "AUTHJWT_SECRET_KEY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialBackend {
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_base_url: Url,
    pub request_timeout: Duration,
    pub landing_path: String,
    pub timezone: Option<String>,
    pub credential_backend: CredentialBackend,
    pub session_secret: Option<String>,
}

impl AppConfig {
    /// `<apiBaseUrl>/api`, the prefix every endpoint hangs off.
    pub fn api_root(&self) -> Result<Url, InfraError> {
        let mut url = self.api_base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("apiBaseUrl cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push("api");
        }
        Ok(url)
    }
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "appName": "taskdesk",
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "requestTimeoutMs": DEFAULT_REQUEST_TIMEOUT_MS,
        "landingPath": DEFAULT_LANDING_PATH,
        "timezone": "UTC",
        "credentialBackend": "file"
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
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

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

/// Reads `app.json`, then lets environment values override the API URL and session secret.
pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;

    let raw_url = optional_lookup_value(&lookup, API_URL_KEYS)
        .or_else(|| read_string(&app, "apiBaseUrl"))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let api_base_url = Url::parse(&raw_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid apiBaseUrl '{raw_url}': {error}")))?;
    if !matches!(api_base_url.scheme(), "http" | "https") {
        return Err(InfraError::InvalidConfig(format!(
            "apiBaseUrl must be http or https: {raw_url}"
        )));
    }

    let request_timeout = match app.get("requestTimeoutMs") {
        None | Some(serde_json::Value::Null) => Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        Some(value) => {
            let millis = value.as_u64().filter(|millis| *millis > 0).ok_or_else(|| {
                InfraError::InvalidConfig("requestTimeoutMs must be a positive integer".to_string())
            })?;
            Duration::from_millis(millis)
        }
    };

    let landing_path = read_string(&app, "landingPath")
        .unwrap_or_else(|| DEFAULT_LANDING_PATH.to_string());
    if !landing_path.starts_with('/') {
        return Err(InfraError::InvalidConfig(format!(
            "landingPath must start with '/': {landing_path}"
        )));
    }

    let timezone = read_string(&app, "timezone");
    if let Some(name) = timezone.as_deref() {
        name.parse::<chrono_tz::Tz>()
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))?;
    }

    let credential_backend = match read_string(&app, "credentialBackend").as_deref() {
        None | Some("file") => CredentialBackend::File,
        Some("keyring") => CredentialBackend::Keyring,
        Some(other) => {
            return Err(InfraError::InvalidConfig(format!(
                "unsupported credentialBackend: {other}"
            )));
        }
    };

    Ok(AppConfig {
        api_base_url,
        request_timeout,
        landing_path,
        timezone,
        credential_backend,
        session_secret: optional_lookup_value(&lookup, SESSION_SECRET_KEYS),
    })
}

fn read_string(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
