use crate::{
    directory::Server,
    domain::DomainSet,
    error::{Error, Result},
    solver::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS},
};
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;

/// The settings of a renewal run, read from a JSON file with camelCase keys
#[derive(Clone, Debug)]
pub struct Config {
    pub domains: DomainSet,
    pub email: String,
    pub aws_hosted_zone_id: String,
    pub aws_credentials_file: PathBuf,
    pub aws_profile: String,
    pub le_server: Server,
    pub storage_root_dir: PathBuf,
    pub log_level: String,
    /// Where to send error reports, none are sent when unset
    pub reports_to_email: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub renew_before: chrono::Duration,
    pub propagation_interval: Duration,
    pub propagation_max_attempts: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    domains: Option<Vec<String>>,
    email: Option<String>,
    aws_hosted_zone_id: Option<String>,
    aws_credentials_file: Option<String>,
    aws_profile: Option<String>,
    le_server: Option<String>,
    storage_root_dir: Option<String>,
    log_level: Option<String>,
    reports_to_email: Option<String>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    renew_before_days: Option<u32>,
    propagation_interval_secs: Option<u64>,
    propagation_max_attempts: Option<usize>,
}

impl Config {
    /// Read the configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("failed to read `{}`: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Parse the configuration, applying defaults for optional keys
    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(contents)
            .map_err(|e| Error::Configuration(format!("malformed configuration file: {e}")))?;
        let home = env::var("HOME").ok();

        let domains = raw
            .domains
            .filter(|d| !d.is_empty())
            .ok_or_else(|| missing("domains"))?;

        Ok(Config {
            domains: DomainSet::new(domains)?,
            email: required(raw.email, "email")?,
            aws_hosted_zone_id: required(raw.aws_hosted_zone_id, "awsHostedZoneId")?,
            aws_credentials_file: expand_home(
                raw.aws_credentials_file.as_deref().unwrap_or("./credentials"),
                home.as_deref(),
            ),
            aws_profile: raw.aws_profile.unwrap_or_else(|| "default".into()),
            le_server: match raw.le_server {
                Some(server) => server.parse()?,
                None => Server::Production,
            },
            storage_root_dir: expand_home(
                raw.storage_root_dir.as_deref().unwrap_or("~/le"),
                home.as_deref(),
            ),
            log_level: raw.log_level.unwrap_or_else(|| "info".into()),
            reports_to_email: raw.reports_to_email.filter(|e| !e.is_empty()),
            smtp_host: raw.smtp_host.unwrap_or_else(|| "localhost".into()),
            smtp_port: raw.smtp_port.unwrap_or(25),
            renew_before: chrono::Duration::days(i64::from(raw.renew_before_days.unwrap_or(30))),
            propagation_interval: raw
                .propagation_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INTERVAL),
            propagation_max_attempts: raw
                .propagation_max_attempts
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        })
    }
}

fn missing(key: &str) -> Error {
    Error::Configuration(format!("missing `{key}` in configuration file"))
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| missing(key))
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path, home) {
        ("~", Some(home)) => PathBuf::from(home),
        (path, Some(home)) if path.starts_with("~/") => Path::new(home).join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}
