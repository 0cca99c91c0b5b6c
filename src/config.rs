use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CREDENTIALS_FILE: &str = "service-account-key.json";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// How requests to the label service are authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    ApiKey(String),
    ServiceAccountFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub credentials: CredentialsSource,
    pub vision_endpoint: String,
    pub max_labels: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub public_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = match lookup("VISION_API_KEY").filter(|key| !key.trim().is_empty()) {
            Some(key) => CredentialsSource::ApiKey(key),
            None => CredentialsSource::ServiceAccountFile(
                lookup("GOOGLE_APPLICATION_CREDENTIALS")
                    .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string())
                    .into(),
            ),
        };

        let vision_endpoint = lookup("VISION_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            credentials,
            vision_endpoint,
            max_labels: parse_or(&lookup, "VISION_MAX_LABELS", 10)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "VISION_TIMEOUT_SECS", 30)?),
            max_retries: parse_or(&lookup, "VISION_MAX_RETRIES", 2)?,
            retry_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "VISION_RETRY_BASE_MS",
                250,
            )?),
            public_dir: lookup("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {value:?}")),
        None => Ok(default),
    }
}
