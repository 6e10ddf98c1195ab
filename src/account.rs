use crate::{directory::Server, error::BoxError, store::CertificateStore};
use instant_acme::{Account, AccountCredentials, NewAccount};
use tracing::info;

/// Load the account registered with `server`, or create and persist a new one
pub(crate) async fn load_or_create(
    server: &Server,
    store: &dyn CertificateStore,
    email: &str,
    terms_of_service_agreed: bool,
) -> Result<Account, BoxError> {
    let key = server.storage_key();

    if let Some(json) = store.load_account(&key).await? {
        let credentials: AccountCredentials = serde_json::from_str(&json)?;
        let account = Account::builder()?.from_credentials(credentials).await?;

        info!(%server, "loaded existing ACME account");
        return Ok(account);
    }

    let contact = format!("mailto:{email}");
    let (account, credentials) = Account::builder()?
        .create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed,
                only_return_existing: false,
            },
            server.url().to_owned(),
            None,
        )
        .await?;

    store
        .save_account(&key, &serde_json::to_string_pretty(&credentials)?)
        .await?;

    info!(%server, %email, "created ACME account");
    Ok(account)
}
