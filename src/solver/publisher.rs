use crate::{
    dns::{ChangeHandle, DnsProvider, TxtRecord, CHALLENGE_TTL},
    domain::normalize,
    error::{Error, Result, Stage},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use openssl::sha::sha256;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tracing::{info, instrument, warn};

const RECORD_PREFIX: &str = "_acme-challenge.";

/// Compute the value a DNS-01 challenge expects: the unpadded base64url encoding of the
/// SHA-256 digest of the key authorization.
pub fn compute_digest(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(sha256(key_authorization.as_bytes()))
}

/// The name of the TXT record validated for `domain`. Wildcard names are validated at their
/// base domain.
pub fn record_name(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{RECORD_PREFIX}{domain}")
}

/// A published challenge record.
///
/// Returned by [`Dns01Publisher::set_challenge`] and consumed by
/// [`Dns01Publisher::remove_challenge`], so every record is removed at most once.
#[derive(Debug)]
pub struct ChallengeRecord {
    domain: String,
    digest: String,
    record: TxtRecord,
    change: ChangeHandle,
}

impl ChallengeRecord {
    /// The domain the challenge was published for
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The unquoted digest stored in the record
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The TXT record exactly as it was submitted
    pub fn record(&self) -> &TxtRecord {
        &self.record
    }

    /// The provider change created by the upsert
    pub fn change(&self) -> &ChangeHandle {
        &self.change
    }
}

/// Publishes and removes `_acme-challenge` TXT records through a [`DnsProvider`].
pub struct Dns01Publisher {
    provider: Arc<dyn DnsProvider>,
    in_flight: Mutex<HashSet<String>>,
}

impl Dns01Publisher {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Dns01Publisher {
            provider,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Upsert the challenge record for `domain`.
    ///
    /// Fails with [`Error::ChallengeInFlight`] without contacting the provider while a record
    /// with the same name has been set and not yet removed.
    #[instrument(level = "debug", skip(self, key_authorization))]
    pub async fn set_challenge(
        &self,
        domain: &str,
        key_authorization: &str,
    ) -> Result<ChallengeRecord> {
        let name = record_name(domain);
        let key = normalize(&name);
        if !self.in_flight.lock().insert(key.clone()) {
            return Err(Error::ChallengeInFlight(name));
        }

        let digest = compute_digest(key_authorization);
        let record = TxtRecord {
            name,
            value: format!("\"{digest}\""),
            ttl: CHALLENGE_TTL,
        };

        match self.provider.upsert_txt(&record).await {
            Ok(change) => {
                info!(record = %record.name, %change, "published challenge record");
                Ok(ChallengeRecord {
                    domain: domain.to_owned(),
                    digest,
                    record,
                    change,
                })
            }
            Err(source) => {
                self.in_flight.lock().remove(&key);
                Err(Error::Provider {
                    stage: Stage::Set,
                    name: record.name,
                    source,
                })
            }
        }
    }

    /// Delete exactly the record produced by [`Dns01Publisher::set_challenge`]. The name is free
    /// to be set again afterwards, even if the provider rejected the deletion.
    #[instrument(level = "debug", skip_all, fields(domain = %challenge.domain))]
    pub async fn remove_challenge(&self, challenge: ChallengeRecord) -> Result<ChangeHandle> {
        let result = self.provider.delete_txt(&challenge.record).await;
        self.in_flight.lock().remove(&normalize(&challenge.record.name));

        match result {
            Ok(change) => {
                info!(record = %challenge.record.name, %change, "removed challenge record");
                Ok(change)
            }
            Err(source) => {
                warn!(record = %challenge.record.name, error = %source, "failed to remove challenge record");
                Err(Error::Provider {
                    stage: Stage::Remove,
                    name: challenge.record.name,
                    source,
                })
            }
        }
    }
}
