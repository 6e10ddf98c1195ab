//! Keeps a certificate for a set of domains current by solving ACME DNS-01 challenges.
//!
//! The pieces fit together as follows:
//! - a [`DnsProvider`] publishes TXT records, [`Route53Provider`] for AWS Route53,
//! - [`Dns01Solver`] publishes the challenge record, waits for the change to propagate and
//!   removes the record once the CA has validated it,
//! - [`AcmeAuthority`] orders certificates from an ACME server, Let's Encrypt by default, and
//!   keeps them in a [`CertificateStore`],
//! - [`RenewalEngine`] decides whether the current certificate covers every domain or has to be
//!   renewed.
//!
//! ```no_run
//! # async fn run() -> Result<(), dnsrenew::Error> {
//! use dnsrenew::{
//!     AcmeAuthority, AwsCredentials, Dns01Solver, DomainSet, FileStore, RenewalEngine,
//!     Route53Provider, Server,
//! };
//! use std::{path::Path, sync::Arc};
//!
//! let credentials = AwsCredentials::load(Path::new("./credentials"), "default").await?;
//! let provider = Arc::new(Route53Provider::new("Z123", credentials));
//! let solver = Arc::new(Dns01Solver::new(provider));
//! let store = Arc::new(FileStore::new("/var/lib/le"));
//!
//! let authority = AcmeAuthority::builder(solver, store)
//!     .server(Server::Staging)
//!     .build();
//!
//! let domains = DomainSet::new(["example.com", "www.example.com"])?;
//! let certificate = RenewalEngine::new(Arc::new(authority))
//!     .ensure_certificate(&domains, "admin@example.com")
//!     .await?;
//! println!("valid until {}", certificate.not_after());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod account;
mod acme;
mod authority;
mod certificate;
mod config;
mod directory;
pub mod dns;
mod domain;
mod error;
mod order;
mod renewal;
pub mod solver;
mod store;

pub use acme::{AcmeAuthority, AcmeAuthorityBuilder, AcmeError};
pub use authority::{CertificateAuthority, RenewalRequest};
pub use certificate::Certificate;
pub use config::Config;
pub use directory::{Server, LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL};
#[cfg(feature = "route53")]
#[cfg_attr(docsrs, doc(cfg(feature = "route53")))]
pub use dns::{AwsCredentials, Route53Error, Route53Provider};
pub use dns::{ChangeHandle, ChangeStatus, DnsProvider, TxtRecord};
pub use domain::DomainSet;
pub use error::{BoxError, Error, Stage};
pub use renewal::RenewalEngine;
pub use solver::{ChallengeRecord, Dns01Solver, Solver};
pub use store::{CertificateStore, FileStore};
