//! Persistence for issued certificates and ACME account credentials
//!
//! [`FileStore`] uses the following layout under its root directory:
//!
//! ```text
//! live/<primary domain>/cert.pem        leaf certificate
//! live/<primary domain>/chain.pem       intermediates
//! live/<primary domain>/fullchain.pem   leaf followed by intermediates
//! live/<primary domain>/privkey.pem     private key, only readable by the owner
//! accounts/<server>/credentials.json    ACME account credentials
//! ```
//!
//! A `*` in the primary domain is written as `_`. Every file is written next to its target and
//! renamed into place, `fullchain.pem` last.

use crate::{
    certificate::Certificate,
    domain::{normalize, DomainSet},
    error::Result,
};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

/// Enables implementing custom certificate storage.
#[async_trait::async_trait]
pub trait CertificateStore: Send + Sync {
    /// Load the certificate keyed by the primary domain, `None` if there is none
    async fn load(&self, domains: &DomainSet) -> Result<Option<Certificate>>;

    /// Store the certificate under the primary domain, replacing any previous one
    async fn save(&self, domains: &DomainSet, certificate: &Certificate) -> Result<()>;

    /// Load the serialized credentials of the account registered with `server`
    async fn load_account(&self, server: &str) -> Result<Option<String>>;

    /// Store the serialized credentials of the account registered with `server`
    async fn save_account(&self, server: &str, credentials: &str) -> Result<()>;
}

/// Stores certificates in a directory tree on disk
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        FileStore { root: root.into() }
    }

    /// The directory holding the certificate files for `domains`
    pub fn live_dir(&self, domains: &DomainSet) -> PathBuf {
        let name = normalize(domains.primary()).replace('*', "_");
        self.root.join("live").join(name)
    }

    fn account_path(&self, server: &str) -> PathBuf {
        self.root
            .join("accounts")
            .join(server)
            .join("credentials.json")
    }
}

#[async_trait::async_trait]
impl CertificateStore for FileStore {
    async fn load(&self, domains: &DomainSet) -> Result<Option<Certificate>> {
        let dir = self.live_dir(domains);

        let Some(chain) = read_optional(&dir.join("fullchain.pem")).await? else {
            debug!(path = %dir.display(), "no stored certificate");
            return Ok(None);
        };
        let private_key = fs::read(dir.join("privkey.pem")).await?;

        Certificate::from_pem(&chain, &private_key).map(Some)
    }

    async fn save(&self, domains: &DomainSet, certificate: &Certificate) -> Result<()> {
        let dir = self.live_dir(domains);
        fs::create_dir_all(&dir).await?;

        let files = [
            ("privkey.pem", certificate.private_key_to_pem()?),
            ("cert.pem", certificate.to_pem()?),
            ("chain.pem", certificate.chain_to_pem()?),
            ("fullchain.pem", certificate.fullchain_to_pem()?),
        ];

        let mut staged = Vec::with_capacity(files.len());
        for (name, contents) in &files {
            let temporary = temporary_path(&dir, name);
            write_private(&temporary, contents).await?;
            staged.push((temporary, dir.join(name)));
        }
        for (temporary, target) in staged {
            fs::rename(temporary, target).await?;
        }

        debug!(path = %dir.display(), "stored certificate");
        Ok(())
    }

    async fn load_account(&self, server: &str) -> Result<Option<String>> {
        let contents = read_optional(&self.account_path(server)).await?;
        Ok(contents.map(|c| String::from_utf8_lossy(&c).into_owned()))
    }

    async fn save_account(&self, server: &str, credentials: &str) -> Result<()> {
        let path = self.account_path(server);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temporary = temporary_path(path.parent().unwrap_or(&self.root), "credentials.json");
        write_private(&temporary, credentials.as_bytes()).await?;
        fs::rename(temporary, path).await?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn temporary_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{name}.tmp"))
}

/// Write a file only the owner can read
async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    // `mode` only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}
