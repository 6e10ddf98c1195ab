use crate::{
    domain::{normalize, DomainSet},
    error::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    nid::Nid,
    pkey::{PKey, Private},
    x509::X509,
};
use std::collections::HashSet;

/// An issued certificate along with its private key
#[derive(Clone, Debug)]
pub struct Certificate {
    chain: Vec<X509>,
    private_key: PKey<Private>,
    subject: Option<String>,
    alt_names: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Parse a PEM encoded chain, leaf certificate first, and its PEM encoded private key
    pub fn from_pem(chain: &[u8], private_key: &[u8]) -> Result<Self> {
        let chain = X509::stack_from_pem(chain)?;
        let private_key = PKey::private_key_from_pem(private_key)?;

        let leaf = chain
            .first()
            .ok_or_else(|| Error::InvalidCertificate("the chain is empty".into()))?;
        if !leaf.public_key()?.public_eq(&private_key) {
            return Err(Error::InvalidCertificate(
                "the private key does not match the certificate".into(),
            ));
        }

        let subject = match leaf.subject_name().entries_by_nid(Nid::COMMONNAME).next() {
            Some(entry) => Some(String::from_utf8_lossy(entry.data().as_slice()).into_owned()),
            None => None,
        };
        let alt_names = leaf
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.dnsname().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        let not_before = to_datetime(leaf.not_before())?;
        let not_after = to_datetime(leaf.not_after())?;

        Ok(Certificate {
            chain,
            private_key,
            subject,
            alt_names,
            not_before,
            not_after,
        })
    }

    /// The common name of the certificate, if any
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The DNS names in the subject alternative name extension
    pub fn alt_names(&self) -> &[String] {
        &self.alt_names
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Every name the certificate is valid for, normalized for comparison
    pub fn covered_names(&self) -> HashSet<String> {
        self.subject
            .iter()
            .chain(&self.alt_names)
            .map(|name| normalize(name))
            .collect()
    }

    /// The requested domains the certificate is not valid for, in request order
    pub fn missing<'d>(&self, domains: &'d DomainSet) -> Vec<&'d str> {
        let covered = self.covered_names();
        domains
            .iter()
            .filter(|domain| !covered.contains(&normalize(domain)))
            .map(String::as_str)
            .collect()
    }

    /// Whether the certificate is valid for every requested domain
    pub fn covers(&self, domains: &DomainSet) -> bool {
        self.missing(domains).is_empty()
    }

    /// Whether the certificate expires, or already expired, within `window` from now
    pub fn expires_within(&self, window: Duration) -> bool {
        self.not_after - Utc::now() <= window
    }

    /// Export the private key in PEM PKCS#8 format
    pub fn private_key_to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.private_key.private_key_to_pem_pkcs8()?)
    }

    /// Export the issued certificate in PEM format
    ///
    /// **NOTE**: this does NOT export the full certificate chain, use
    /// [`Certificate::fullchain_to_pem`] for that.
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.chain[0].to_pem()?)
    }

    /// Export the intermediate certificates in PEM format
    pub fn chain_to_pem(&self) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        for certificate in &self.chain[1..] {
            result.extend(certificate.to_pem()?);
        }
        Ok(result)
    }

    /// Export the full certificate chain in PEM format
    pub fn fullchain_to_pem(&self) -> Result<Vec<u8>> {
        let mut result = Vec::new();
        for certificate in &self.chain {
            result.extend(certificate.to_pem()?);
        }
        Ok(result)
    }
}

fn to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86400 + i64::from(diff.secs);

    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::InvalidCertificate("validity is out of range".into()))
}
