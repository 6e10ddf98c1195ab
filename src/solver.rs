//! DNS-01 challenge solving
//!
//! The DNS-01 challenge works by creating a TXT record for your domain containing a digest of the
//! key authorization for the challenge, proving control over the domain to the CA. It is the only
//! way to issue [wildcard certificates](https://en.wikipedia.org/wiki/Wildcard_certificate), and
//! works without opening any port on the machine requesting the certificate.
//!
//! However, you will need to deal with the potential security threat of keeping DNS API credentials
//! on your server.
//!
//! A round for one domain is made of four steps:
//! 1. [`Dns01Publisher::set_challenge`] upserts the record,
//! 2. [`PropagationWaiter::wait_until_propagated`] polls the provider until the change is applied,
//! 3. the CA validates the record,
//! 4. [`Dns01Publisher::remove_challenge`] deletes it again.
//!
//! [`Dns01Solver`] bundles steps 1, 2 and 4 behind the [`Solver`] trait.

use crate::{dns::DnsProvider, error::Result};
use std::{sync::Arc, time::Duration};
use tracing::warn;

mod propagation;
mod publisher;

pub use propagation::{PropagationWaiter, DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS};
pub use publisher::{compute_digest, record_name, ChallengeRecord, Dns01Publisher};

/// Enables implementing a custom challenge solver.
///
/// Rounds are run one at a time: [`Solver::cleanup`] for a record is called before the next
/// [`Solver::present`].
#[async_trait::async_trait]
pub trait Solver: Send + Sync {
    /// Makes the solution to a challenge available, returning once the CA can validate it.
    async fn present(&self, domain: &str, key_authorization: &str) -> Result<ChallengeRecord>;

    /// Remove a challenge made available by [`Solver::present`].
    async fn cleanup(&self, record: ChallengeRecord) -> Result<()>;

    /// How many times to check the authorization after the challenge was submitted before
    /// timing out. Defaults to 30 tries.
    fn attempts(&self) -> usize {
        30
    }

    /// How long to wait between successive authorization checks. Defaults to 2 seconds.
    fn interval(&self) -> Duration {
        Duration::from_secs(2)
    }
}

/// Solves DNS-01 challenges by publishing records through a [`DnsProvider`] and waiting for
/// them to propagate.
pub struct Dns01Solver {
    publisher: Dns01Publisher,
    waiter: PropagationWaiter,
}

impl Dns01Solver {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Dns01Solver {
            publisher: Dns01Publisher::new(provider.clone()),
            waiter: PropagationWaiter::new(provider),
        }
    }

    /// Set the time between propagation checks, defaults to 1 second
    pub fn propagation_interval(mut self, interval: Duration) -> Self {
        self.waiter = self.waiter.interval(interval);
        self
    }

    /// Set the maximum number of propagation checks, defaults to 600
    pub fn propagation_max_attempts(mut self, attempts: usize) -> Self {
        self.waiter = self.waiter.max_attempts(attempts);
        self
    }
}

#[async_trait::async_trait]
impl Solver for Dns01Solver {
    async fn present(&self, domain: &str, key_authorization: &str) -> Result<ChallengeRecord> {
        let record = self
            .publisher
            .set_challenge(domain, key_authorization)
            .await?;

        if let Err(error) = self.waiter.wait_until_propagated(record.change()).await {
            warn!(%domain, %error, "challenge record did not propagate, removing it");
            // the removal failure is already logged by the publisher
            let _ = self.publisher.remove_challenge(record).await;
            return Err(error);
        }

        Ok(record)
    }

    async fn cleanup(&self, record: ChallengeRecord) -> Result<()> {
        self.publisher.remove_challenge(record).await?;
        Ok(())
    }
}
