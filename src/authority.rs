use crate::{certificate::Certificate, domain::DomainSet, error::Result};

/// What to ask the certificate authority for
#[derive(Clone, Debug)]
pub struct RenewalRequest {
    pub domains: DomainSet,
    /// Contact address for the CA account
    pub email: String,
    pub agree_tos: bool,
    /// Issue a new certificate even if a usable one is already stored
    pub duplicate: bool,
}

impl RenewalRequest {
    /// A request agreeing to the terms of service, without forcing a duplicate certificate
    pub fn new<S: Into<String>>(domains: DomainSet, email: S) -> Self {
        RenewalRequest {
            domains,
            email: email.into(),
            agree_tos: true,
            duplicate: false,
        }
    }

    /// Force issuance even when a stored certificate is still usable
    pub fn duplicate(mut self, duplicate: bool) -> Self {
        self.duplicate = duplicate;
        self
    }
}

/// Enables implementing a source of certificates for the renewal engine.
#[async_trait::async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Get the current certificate for the request's primary domain, issuing one if there is
    /// none, if it expires soon, or if `request.duplicate` is set. Fails with
    /// [`Error::Issuance`](crate::Error::Issuance).
    async fn register(&self, request: &RenewalRequest) -> Result<Certificate>;

    /// Issue a new certificate for the request's domains, replacing `previous`. Fails with
    /// [`Error::Renewal`](crate::Error::Renewal).
    async fn renew(&self, request: &RenewalRequest, previous: &Certificate) -> Result<Certificate>;
}
