use crate::{
    authority::{CertificateAuthority, RenewalRequest},
    certificate::Certificate,
    domain::DomainSet,
    error::Result,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Decides whether the current certificate is good enough or has to be replaced
pub struct RenewalEngine {
    authority: Arc<dyn CertificateAuthority>,
}

impl RenewalEngine {
    pub fn new(authority: Arc<dyn CertificateAuthority>) -> Self {
        RenewalEngine { authority }
    }

    /// Make sure a certificate covering every domain exists.
    ///
    /// The certificate returned by [`CertificateAuthority::register`] is kept when its subject
    /// and alternative names cover every requested domain. Otherwise a duplicate is requested
    /// through [`CertificateAuthority::renew`]. Extra names on the certificate never trigger a
    /// renewal.
    #[instrument(skip_all, fields(%domains))]
    pub async fn ensure_certificate(&self, domains: &DomainSet, email: &str) -> Result<Certificate> {
        let request = RenewalRequest::new(domains.clone(), email);
        let certificate = self.authority.register(&request).await?;

        info!(
            subject = certificate.subject().unwrap_or_default(),
            alt_names = ?certificate.alt_names(),
            expires = %certificate.not_after(),
            "active certificate"
        );

        let missing = certificate.missing(domains);
        if missing.is_empty() {
            info!("certificate covers every domain");
            return Ok(certificate);
        }

        info!(?missing, "certificate does not cover every domain, renewing");
        self.authority
            .renew(&request.duplicate(true), &certificate)
            .await
    }
}
