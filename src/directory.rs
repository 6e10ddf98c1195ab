use crate::error::Error;
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// The Let's Encrypt production ACMEv2 API
pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// The Let's Encrypt staging ACMEv2 API
pub const LETS_ENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// The ACME server certificates are requested from
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Server {
    Staging,
    #[default]
    Production,
    /// Any other ACME directory, by URL
    Custom(String),
}

impl Server {
    /// The directory URL
    pub fn url(&self) -> &str {
        match self {
            Self::Staging => LETS_ENCRYPT_STAGING_URL,
            Self::Production => LETS_ENCRYPT_PRODUCTION_URL,
            Self::Custom(url) => url,
        }
    }

    /// A file name safe identifier, used to key the account credentials
    pub fn storage_key(&self) -> String {
        match self {
            Self::Staging => "staging".into(),
            Self::Production => "production".into(),
            Self::Custom(url) => {
                let url = url
                    .strip_prefix("https://")
                    .or_else(|| url.strip_prefix("http://"))
                    .unwrap_or(url);
                url.chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                    .collect()
            }
        }
    }
}

impl FromStr for Server {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            url if url.starts_with("https://") || url.starts_with("http://") => {
                Ok(Self::Custom(url.to_owned()))
            }
            other => Err(Error::Configuration(format!(
                "unknown ACME server `{other}`, expected `staging`, `production` or a directory URL"
            ))),
        }
    }
}

impl Display for Server {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staging => f.write_str("staging"),
            Self::Production => f.write_str("production"),
            Self::Custom(url) => f.write_str(url),
        }
    }
}
