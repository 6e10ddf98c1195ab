use crate::error::{Error, Result};
use std::{
    fmt::{Display, Formatter},
    ops::Deref,
};

const MAX_NAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// The ordered, non-empty set of names a certificate must cover.
///
/// The first name is the primary domain and is used to key the certificate in storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DomainSet(Vec<String>);

impl DomainSet {
    /// Validate the names and build the set. Names are stored lowercase without a trailing root
    /// dot, and repeats of an earlier name are dropped.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut domains: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !is_valid_name(&name) {
                return Err(Error::InvalidDomain(name));
            }
            let name = normalize(&name);
            if !domains.contains(&name) {
                domains.push(name);
            }
        }

        if domains.is_empty() {
            return Err(Error::Configuration(
                "at least one domain is required".into(),
            ));
        }

        Ok(DomainSet(domains))
    }

    /// The name used to key the certificate
    pub fn primary(&self) -> &str {
        &self.0[0]
    }
}

impl Deref for DomainSet {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DomainSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Reduce a name to the form used for coverage comparison: ASCII lowercase, without a
/// trailing root dot.
pub(crate) fn normalize(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

fn is_valid_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    let base = name.strip_prefix("*.").unwrap_or(name);

    if base.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }

    base.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}
