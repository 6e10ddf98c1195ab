//! The [`CertificateAuthority`] backed by an ACME server
//!
//! Accounts are created on first use and their credentials persisted through the
//! [`CertificateStore`], so later runs reuse the same account. Every issuance creates one order
//! covering all requested domains and solves its DNS-01 challenges one at a time.

use crate::{
    account,
    authority::{CertificateAuthority, RenewalRequest},
    certificate::Certificate,
    directory::Server,
    error::{BoxError, Error, Result},
    order,
    solver::Solver,
    store::CertificateStore,
};
use chrono::Duration;
use instant_acme::Account;
use std::{
    error::Error as StdError,
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Failures of the ACME exchange that are not reported by the ACME client itself
#[derive(Debug)]
pub enum AcmeError {
    /// The authorization does not offer a DNS-01 challenge
    NoDns01Challenge(String),
    /// The challenge is no longer part of the order
    ChallengeNotFound(String),
    /// The CA could not validate the challenge
    AuthorizationInvalid(String),
    /// The authorization was still pending after the maximum number of checks
    AuthorizationTimeout { domain: String, attempts: usize },
    /// The order became invalid
    OrderInvalid,
    /// The order did not progress after the maximum number of checks
    OrderTimeout { attempts: usize },
    /// The order is valid but no certificate was returned
    MissingCertificate,
}

impl Display for AcmeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDns01Challenge(domain) => {
                write!(f, "no dns-01 challenge offered for `{domain}`")
            }
            Self::ChallengeNotFound(url) => write!(f, "challenge `{url}` not found in the order"),
            Self::AuthorizationInvalid(domain) => {
                write!(f, "the authorization for `{domain}` is invalid")
            }
            Self::AuthorizationTimeout { domain, attempts } => write!(
                f,
                "the authorization for `{domain}` was still pending after {attempts} checks"
            ),
            Self::OrderInvalid => write!(f, "the order is invalid"),
            Self::OrderTimeout { attempts } => {
                write!(f, "the order did not progress after {attempts} checks")
            }
            Self::MissingCertificate => write!(f, "no certificate was issued for the order"),
        }
    }
}

impl StdError for AcmeError {}

/// A builder used to create an [`AcmeAuthority`]
pub struct AcmeAuthorityBuilder {
    server: Server,
    solver: Arc<dyn Solver>,
    store: Arc<dyn CertificateStore>,
    renew_before: Duration,
}

impl AcmeAuthorityBuilder {
    /// Use a different ACME server, defaults to Let's Encrypt production
    pub fn server(mut self, server: Server) -> Self {
        self.server = server;
        self
    }

    /// Replace stored certificates expiring within this window, defaults to 30 days
    pub fn renew_before(mut self, window: Duration) -> Self {
        self.renew_before = window;
        self
    }

    pub fn build(self) -> AcmeAuthority {
        AcmeAuthority {
            server: self.server,
            solver: self.solver,
            store: self.store,
            renew_before: self.renew_before,
            account: OnceCell::new(),
        }
    }
}

/// Obtains certificates from an ACME server using DNS-01 challenges
pub struct AcmeAuthority {
    server: Server,
    solver: Arc<dyn Solver>,
    store: Arc<dyn CertificateStore>,
    renew_before: Duration,
    account: OnceCell<Account>,
}

impl AcmeAuthority {
    pub fn builder(solver: Arc<dyn Solver>, store: Arc<dyn CertificateStore>) -> AcmeAuthorityBuilder {
        AcmeAuthorityBuilder {
            server: Server::default(),
            solver,
            store,
            renew_before: Duration::days(30),
        }
    }

    async fn issue(&self, request: &RenewalRequest) -> std::result::Result<Certificate, BoxError> {
        let account = self
            .account
            .get_or_try_init(|| {
                account::load_or_create(
                    &self.server,
                    self.store.as_ref(),
                    &request.email,
                    request.agree_tos,
                )
            })
            .await?;

        let certificate = order::obtain(account, &request.domains, self.solver.as_ref()).await?;
        self.store.save(&request.domains, &certificate).await?;

        Ok(certificate)
    }
}

impl Debug for AcmeAuthority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // `Solver` and `CertificateStore` don't implement debug
        f.debug_struct("AcmeAuthority")
            .field("server", &self.server)
            .field("renew_before", &self.renew_before)
            .field("account_loaded", &self.account.initialized())
            .finish()
    }
}

#[async_trait::async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn register(&self, request: &RenewalRequest) -> Result<Certificate> {
        if !request.duplicate {
            let stored = match self.store.load(&request.domains).await {
                Ok(stored) => stored,
                Err(error) => {
                    warn!(domains = %request.domains, %error, "stored certificate is unusable");
                    None
                }
            };

            match stored {
                Some(certificate) if !certificate.expires_within(self.renew_before) => {
                    info!(
                        domains = %request.domains,
                        expires = %certificate.not_after(),
                        "using stored certificate"
                    );
                    return Ok(certificate);
                }
                Some(certificate) => info!(
                    expires = %certificate.not_after(),
                    "stored certificate expires soon, replacing it"
                ),
                None => info!(domains = %request.domains, "no stored certificate"),
            }
        }

        self.issue(request).await.map_err(Error::Issuance)
    }

    async fn renew(&self, request: &RenewalRequest, previous: &Certificate) -> Result<Certificate> {
        info!(
            domains = %request.domains,
            replacing = ?previous.alt_names(),
            "renewing certificate"
        );
        self.issue(request).await.map_err(Error::Renewal)
    }
}

#[cfg(test)]
mod tests {
    use super::{AcmeAuthority, AcmeError};
    use crate::{
        authority::{CertificateAuthority, RenewalRequest},
        certificate::Certificate,
        domain::DomainSet,
        solver::Dns01Solver,
        store::CertificateStore,
        store::FileStore,
        test::{self_signed, MemoryStore, ScriptedDns},
        Error,
    };
    use std::sync::Arc;

    fn authority(store: Arc<MemoryStore>) -> AcmeAuthority {
        let solver = Arc::new(Dns01Solver::new(Arc::new(ScriptedDns::default())));
        AcmeAuthority::builder(solver, store).build()
    }

    async fn stored(store: &MemoryStore, domains: &DomainSet, days: u32) {
        let (chain, key) = self_signed(Some(domains.primary()), &[domains.primary()], days);
        let certificate = Certificate::from_pem(&chain, &key).unwrap();
        store.save(domains, &certificate).await.unwrap();
    }

    #[tokio::test]
    async fn register_returns_usable_stored_certificate() {
        let store = Arc::new(MemoryStore::default());
        let domains = DomainSet::new(["example.com"]).unwrap();
        stored(&store, &domains, 60).await;

        let certificate = authority(store.clone())
            .register(&RenewalRequest::new(domains, "admin@example.com"))
            .await
            .unwrap();
        assert_eq!(certificate.subject(), Some("example.com"));
        assert!(store.accounts.lock().is_empty());
    }

    #[tokio::test]
    async fn expiring_certificate_is_replaced() {
        let store = Arc::new(MemoryStore::default());
        let domains = DomainSet::new(["example.com"]).unwrap();
        stored(&store, &domains, 10).await;
        // an unreadable account makes issuance fail before any network access
        store.accounts.lock().insert("production".into(), "{".into());

        let error = authority(store)
            .register(&RenewalRequest::new(domains, "admin@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Issuance(_)));
    }

    #[test_log::test(tokio::test)]
    async fn unreadable_stored_certificate_is_reissued() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let domains = DomainSet::new(["example.com"]).unwrap();

        // a chain left without its key
        let live = store.live_dir(&domains);
        std::fs::create_dir_all(&live).unwrap();
        let (chain, _) = self_signed(Some("example.com"), &["example.com"], 60);
        std::fs::write(live.join("fullchain.pem"), chain).unwrap();
        store.save_account("production", "{").await.unwrap();

        let solver = Arc::new(Dns01Solver::new(Arc::new(ScriptedDns::default())));
        let error = AcmeAuthority::builder(solver, store)
            .build()
            .register(&RenewalRequest::new(domains, "admin@example.com"))
            .await
            .unwrap_err();

        // issuance was attempted and stopped at the unreadable account
        assert!(matches!(
            &error,
            Error::Issuance(source) if source.downcast_ref::<serde_json::Error>().is_some()
        ));
    }

    #[tokio::test]
    async fn renew_wraps_failures() {
        let store = Arc::new(MemoryStore::default());
        store.accounts.lock().insert("production".into(), "{".into());
        let domains = DomainSet::new(["example.com"]).unwrap();
        let (chain, key) = self_signed(Some("example.com"), &["example.com"], 60);
        let previous = Certificate::from_pem(&chain, &key).unwrap();

        let request = RenewalRequest::new(domains, "admin@example.com").duplicate(true);
        let error = authority(store).renew(&request, &previous).await.unwrap_err();
        assert!(matches!(error, Error::Renewal(_)));
    }

    #[test]
    fn describes_authorization_failures() {
        let error = AcmeError::AuthorizationTimeout {
            domain: "example.com".into(),
            attempts: 30,
        };
        assert_eq!(
            error.to_string(),
            "the authorization for `example.com` was still pending after 30 checks"
        );
    }
}
