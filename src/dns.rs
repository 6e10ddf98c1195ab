//! DNS providers able to publish DNS-01 challenge records
//!
//! The core only needs three operations from a provider: upsert a TXT record, delete a TXT
//! record, and report whether a previously submitted change has been applied. Providers that
//! apply changes synchronously can return [`ChangeStatus::Done`] straight away.
//!
//! Currently, the following providers are supported:
//! - [AWS Route53](https://aws.amazon.com/route53/): [`Route53Provider`]

use crate::error::BoxError;
use std::fmt::{Display, Formatter};

#[cfg(feature = "route53")]
mod credentials;
#[cfg(feature = "route53")]
mod route53;
#[cfg(feature = "route53")]
mod sigv4;

#[cfg(feature = "route53")]
#[cfg_attr(docsrs, doc(cfg(feature = "route53")))]
pub use credentials::AwsCredentials;
#[cfg(feature = "route53")]
#[cfg_attr(docsrs, doc(cfg(feature = "route53")))]
pub use route53::{Route53Error, Route53Provider};

/// The TTL of challenge records, in seconds
pub const CHALLENGE_TTL: u32 = 300;

/// A TXT record as submitted to the provider. `value` is the full record data, including the
/// surrounding quotes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxtRecord {
    pub name: String,
    pub value: String,
    pub ttl: u32,
}

/// An opaque identifier of a pending record mutation
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ChangeHandle(String);

impl ChangeHandle {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ChangeHandle(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl Display for ChangeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a record mutation has been applied. A change never goes back to `Pending` once it is
/// `Done`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeStatus {
    Pending,
    Done,
}

/// Enables implementing a DNS provider for the challenge publisher.
#[async_trait::async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create the record, replacing any record with the same name and type.
    async fn upsert_txt(&self, record: &TxtRecord) -> Result<ChangeHandle, BoxError>;

    /// Delete the record. Most providers require the exact value that was set.
    async fn delete_txt(&self, record: &TxtRecord) -> Result<ChangeHandle, BoxError>;

    /// Query whether the change has been applied.
    async fn change_status(&self, change: &ChangeHandle) -> Result<ChangeStatus, BoxError>;
}

/// Used by [`DnsProvider`]s to convert an arbitrary error to a boxed trait object.
pub fn boxed_err<E>(e: E) -> BoxError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(e)
}
