use openssl::error::ErrorStack;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
    io,
};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// An arbitrary error produced by an external capability (DNS provider, ACME client, ...)
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The step of a challenge round or renewal that failed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Publishing the challenge record
    Set,
    /// Waiting for the record change to propagate
    Wait,
    /// Removing the challenge record
    Remove,
    /// Obtaining the current or a new certificate
    Register,
    /// Forcing a replacement certificate
    Renew,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            Self::Set => "set",
            Self::Wait => "wait",
            Self::Remove => "remove",
            Self::Register => "register",
            Self::Renew => "renew",
        };
        f.write_str(stage)
    }
}

#[derive(Debug)]
pub enum Error {
    /// The DNS provider rejected a record mutation or a status query
    Provider {
        stage: Stage,
        /// The record name or change id the request was about
        name: String,
        source: BoxError,
    },
    /// The record change was still pending after the maximum number of status checks
    PropagationTimeout { change: String, attempts: usize },
    /// A challenge for the same record name has been set but not yet removed
    ChallengeInFlight(String),
    /// The certificate authority could not issue the certificate
    Issuance(BoxError),
    /// The certificate authority could not renew the certificate
    Renewal(BoxError),
    /// The domain is not a syntactically valid DNS name
    InvalidDomain(String),
    /// Required settings are missing or malformed
    Configuration(String),
    /// Failed to parse or export certificate material
    Certificate(ErrorStack),
    /// The certificate material parsed but is unusable
    InvalidCertificate(String),
    /// Failed to read or write the certificate store
    Store(io::Error),
    /// Failed to (de)serialize stored data
    Serialization(serde_json::Error),
}

impl Error {
    /// The stage a challenge or renewal failure happened in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Provider { stage, .. } => Some(*stage),
            Self::PropagationTimeout { .. } => Some(Stage::Wait),
            Self::ChallengeInFlight(_) => Some(Stage::Set),
            Self::Issuance(_) => Some(Stage::Register),
            Self::Renewal(_) => Some(Stage::Renew),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider { stage, name, .. } => {
                write!(f, "dns provider failed during `{stage}` for `{name}`")
            }
            Self::PropagationTimeout { change, attempts } => write!(
                f,
                "change `{change}` did not propagate after {attempts} status checks"
            ),
            Self::ChallengeInFlight(name) => {
                write!(f, "a challenge for `{name}` is already in flight")
            }
            Self::Issuance(_) => write!(f, "failed to obtain the certificate"),
            Self::Renewal(_) => write!(f, "failed to renew the certificate"),
            Self::InvalidDomain(name) => write!(f, "`{name}` is not a valid domain name"),
            Self::Configuration(message) => write!(f, "invalid configuration: {message}"),
            Self::Certificate(_) => write!(f, "failed to process certificate material"),
            Self::InvalidCertificate(reason) => write!(f, "invalid certificate: {reason}"),
            Self::Store(_) => write!(f, "an error occurred while accessing the certificate store"),
            Self::Serialization(_) => write!(f, "failed to (de)serialize stored data"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Provider { source, .. } => Some(source.as_ref()),
            Self::PropagationTimeout { .. } => None,
            Self::ChallengeInFlight(_) => None,
            Self::Issuance(e) => Some(e.as_ref()),
            Self::Renewal(e) => Some(e.as_ref()),
            Self::InvalidDomain(_) => None,
            Self::Configuration(_) => None,
            Self::Certificate(e) => Some(e),
            Self::InvalidCertificate(_) => None,
            Self::Store(e) => Some(e),
            Self::Serialization(e) => Some(e),
        }
    }
}

impl From<ErrorStack> for Error {
    fn from(err: ErrorStack) -> Self {
        Self::Certificate(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Store(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Stage};
    use std::error::Error as _;

    #[test]
    fn provider_error_names_stage_and_record() {
        let error = Error::Provider {
            stage: Stage::Remove,
            name: "_acme-challenge.example.com".into(),
            source: "throttled".into(),
        };

        assert_eq!(
            error.to_string(),
            "dns provider failed during `remove` for `_acme-challenge.example.com`"
        );
        assert_eq!(error.source().unwrap().to_string(), "throttled");
        assert_eq!(error.stage(), Some(Stage::Remove));
    }

    #[test]
    fn issuance_keeps_cause() {
        let inner = Error::PropagationTimeout {
            change: "C123".into(),
            attempts: 600,
        };
        let error = Error::Issuance(Box::new(inner));

        assert_eq!(error.stage(), Some(Stage::Register));
        assert_eq!(
            error.source().unwrap().to_string(),
            "change `C123` did not propagate after 600 status checks"
        );
    }
}
