use crate::error::{Error, Result};
use std::{
    env,
    fmt::{Debug, Formatter},
    io::ErrorKind,
    path::Path,
};
use tokio::fs;
use tracing::debug;

/// Credentials used to sign requests to AWS
#[derive(Clone)]
pub struct AwsCredentials {
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
    pub(crate) session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new<A: Into<String>, S: Into<String>>(access_key_id: A, secret_access_key: S) -> Self {
        AwsCredentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Set the session token for temporary credentials
    pub fn session_token<S: Into<String>>(mut self, token: S) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Load credentials for `profile` from a shared credentials file, falling back to the
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN` environment
    /// variables when the file does not exist.
    pub async fn load(path: &Path, profile: &str) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(contents) => Self::from_ini(&contents, profile).ok_or_else(|| {
                Error::Configuration(format!(
                    "profile `{profile}` in `{}` is missing aws_access_key_id or aws_secret_access_key",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "credentials file not found, using environment");
                Self::from_env().ok_or_else(|| {
                    Error::Configuration(format!(
                        "no AWS credentials in `{}` or the environment",
                        path.display()
                    ))
                })
            }
            Err(e) => Err(Error::Configuration(format!(
                "failed to read `{}`: {e}",
                path.display()
            ))),
        }
    }

    /// Read credentials from the standard environment variables
    pub fn from_env() -> Option<Self> {
        let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        let credentials = AwsCredentials::new(access_key_id, secret_access_key);

        Some(match env::var("AWS_SESSION_TOKEN") {
            Ok(token) => credentials.session_token(token),
            Err(_) => credentials,
        })
    }

    /// Parse the shared credentials file format
    fn from_ini(contents: &str, profile: &str) -> Option<Self> {
        let mut in_profile = false;
        let mut access_key_id = None;
        let mut secret_access_key = None;
        let mut session_token = None;

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_profile = section.trim() == profile;
                continue;
            }

            if !in_profile {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().to_owned();
                match key.trim() {
                    "aws_access_key_id" => access_key_id = Some(value),
                    "aws_secret_access_key" => secret_access_key = Some(value),
                    "aws_session_token" => session_token = Some(value),
                    _ => {}
                }
            }
        }

        Some(AwsCredentials {
            access_key_id: access_key_id?,
            secret_access_key: secret_access_key?,
            session_token,
        })
    }
}

impl Debug for AwsCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
