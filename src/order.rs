use crate::{
    acme::AcmeError,
    certificate::Certificate,
    domain::DomainSet,
    error::BoxError,
    solver::Solver,
};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

/// A DNS-01 challenge still to be solved
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PendingChallenge {
    pub domain: String,
    pub key_authorization: String,
    /// Identifies the challenge within the order
    pub url: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Validation {
    Pending,
    Valid,
    Invalid,
}

/// The authorization operations a challenge round needs from an order
#[async_trait::async_trait]
pub(crate) trait Authorizations: Send {
    /// The DNS-01 challenges of every authorization that is not valid yet
    async fn pending(&mut self) -> Result<Vec<PendingChallenge>, BoxError>;

    /// Tell the CA the challenge can be validated
    async fn set_ready(&mut self, challenge: &PendingChallenge) -> Result<(), BoxError>;

    /// The current state of the authorization the challenge belongs to
    async fn validation(&mut self, challenge: &PendingChallenge) -> Result<Validation, BoxError>;
}

#[async_trait::async_trait]
impl Authorizations for Order {
    async fn pending(&mut self) -> Result<Vec<PendingChallenge>, BoxError> {
        let mut pending = Vec::new();

        let mut authorizations = self.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;

            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            if authz.status == AuthorizationStatus::Valid {
                debug!(%domain, "authorization already valid");
                continue;
            }

            let challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::NoDns01Challenge(domain.clone()))?;

            pending.push(PendingChallenge {
                key_authorization: challenge.key_authorization().as_str().to_owned(),
                url: challenge.url.clone(),
                domain,
            });
        }

        Ok(pending)
    }

    async fn set_ready(&mut self, challenge: &PendingChallenge) -> Result<(), BoxError> {
        let mut authorizations = self.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            if !authz.challenges.iter().any(|c| c.url == challenge.url) {
                continue;
            }

            if let Some(mut handle) = authz.challenge(ChallengeType::Dns01) {
                handle.set_ready().await?;
                return Ok(());
            }
        }

        Err(AcmeError::ChallengeNotFound(challenge.url.clone()).into())
    }

    async fn validation(&mut self, challenge: &PendingChallenge) -> Result<Validation, BoxError> {
        let mut authorizations = self.authorizations();
        while let Some(result) = authorizations.next().await {
            let authz = result?;
            if !authz.challenges.iter().any(|c| c.url == challenge.url) {
                continue;
            }

            return Ok(match authz.status {
                AuthorizationStatus::Pending => Validation::Pending,
                AuthorizationStatus::Valid => Validation::Valid,
                _ => Validation::Invalid,
            });
        }

        Err(AcmeError::ChallengeNotFound(challenge.url.clone()).into())
    }
}

/// Solve every pending challenge, one round at a time.
///
/// Once a record is published it is always cleaned up. A cleanup failure after successful
/// validation is only logged.
pub(crate) async fn solve_challenges<A>(order: &mut A, solver: &dyn Solver) -> Result<(), BoxError>
where
    A: Authorizations + ?Sized,
{
    for challenge in order.pending().await? {
        info!(domain = %challenge.domain, "starting challenge round");

        let record = solver
            .present(&challenge.domain, &challenge.key_authorization)
            .await?;

        let validated = validate(order, solver, &challenge).await;
        let cleaned = solver.cleanup(record).await;

        match (validated, cleaned) {
            (Ok(()), Ok(())) => info!(domain = %challenge.domain, "challenge validated"),
            (Ok(()), Err(error)) => {
                warn!(domain = %challenge.domain, %error, "challenge validated but its record could not be removed")
            }
            (Err(error), cleaned) => {
                if let Err(cleanup) = cleaned {
                    warn!(domain = %challenge.domain, error = %cleanup, "failed to remove challenge record");
                }
                return Err(error);
            }
        }
    }

    Ok(())
}

async fn validate<A>(
    order: &mut A,
    solver: &dyn Solver,
    challenge: &PendingChallenge,
) -> Result<(), BoxError>
where
    A: Authorizations + ?Sized,
{
    order.set_ready(challenge).await?;

    let attempts = solver.attempts().max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;

        match order.validation(challenge).await? {
            Validation::Valid => return Ok(()),
            Validation::Invalid => {
                return Err(AcmeError::AuthorizationInvalid(challenge.domain.clone()).into())
            }
            Validation::Pending if attempt >= attempts => {
                return Err(AcmeError::AuthorizationTimeout {
                    domain: challenge.domain.clone(),
                    attempts,
                }
                .into())
            }
            Validation::Pending => {
                debug!(domain = %challenge.domain, attempt, "authorization still pending");
                time::sleep(solver.interval()).await;
            }
        }
    }
}

/// Order a certificate covering every domain, solving the challenges with `solver`
pub(crate) async fn obtain(
    account: &Account,
    domains: &DomainSet,
    solver: &dyn Solver,
) -> Result<Certificate, BoxError> {
    let identifiers = domains
        .iter()
        .map(|d| Identifier::Dns(d.clone()))
        .collect::<Vec<_>>();

    info!(%domains, "creating certificate order");
    let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

    solve_challenges(&mut order, solver).await?;

    let attempts = solver.attempts().max(1);
    let interval = solver.interval();
    wait_for(&mut order, &[OrderStatus::Ready, OrderStatus::Valid], attempts, interval).await?;

    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(domains.to_vec())?;
    params.distinguished_name = DistinguishedName::new();
    let csr = params.serialize_request(&key)?.der().to_vec();

    order.finalize_csr(&csr).await?;
    wait_for(&mut order, &[OrderStatus::Valid], attempts, interval).await?;

    let chain = order
        .certificate()
        .await?
        .ok_or(AcmeError::MissingCertificate)?;
    let certificate = Certificate::from_pem(chain.as_bytes(), key.serialize_pem().as_bytes())?;

    info!(%domains, expires = %certificate.not_after(), "certificate issued");
    Ok(certificate)
}

/// Poll the order until it reaches one of `targets`
async fn wait_for(
    order: &mut Order,
    targets: &[OrderStatus],
    attempts: usize,
    interval: Duration,
) -> Result<(), BoxError> {
    let mut attempt = 0;
    loop {
        attempt += 1;

        let status = order.refresh().await?.status;
        if targets.contains(&status) {
            return Ok(());
        }
        if status == OrderStatus::Invalid {
            return Err(AcmeError::OrderInvalid.into());
        }
        if attempt >= attempts {
            return Err(AcmeError::OrderTimeout { attempts }.into());
        }

        debug!(?status, attempt, "waiting for order");
        time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{solve_challenges, Authorizations, PendingChallenge, Validation};
    use crate::{
        acme::AcmeError,
        error::BoxError,
        solver::Dns01Solver,
        test::{Call, ScriptedDns},
    };
    use std::{collections::VecDeque, sync::Arc};

    /// Records the order of operations across the DNS provider and the CA
    #[derive(Default)]
    struct FakeOrder {
        dns: Arc<ScriptedDns>,
        pending: Vec<PendingChallenge>,
        validations: VecDeque<Validation>,
        events: Vec<String>,
    }

    impl FakeOrder {
        fn new(dns: Arc<ScriptedDns>, domains: &[&str]) -> Self {
            FakeOrder {
                dns,
                pending: domains
                    .iter()
                    .map(|d| PendingChallenge {
                        domain: d.to_string(),
                        key_authorization: format!("token-{d}.thumbprint"),
                        url: format!("https://ca.test/chall/{d}"),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Authorizations for FakeOrder {
        async fn pending(&mut self) -> Result<Vec<PendingChallenge>, BoxError> {
            Ok(self.pending.clone())
        }

        async fn set_ready(&mut self, challenge: &PendingChallenge) -> Result<(), BoxError> {
            // the record must be published and propagated at this point
            let published = self
                .dns
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::Upsert(_)))
                .count();
            self.events
                .push(format!("ready {} after {published} upserts", challenge.domain));
            Ok(())
        }

        async fn validation(&mut self, challenge: &PendingChallenge) -> Result<Validation, BoxError> {
            self.events.push(format!("check {}", challenge.domain));
            Ok(self.validations.pop_front().unwrap_or(Validation::Valid))
        }
    }

    fn deletes(dns: &ScriptedDns) -> usize {
        dns.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn rounds_are_serialized() {
        let dns = Arc::new(ScriptedDns::default());
        let solver = Dns01Solver::new(dns.clone());
        let mut order = FakeOrder::new(dns.clone(), &["a.example.com", "b.example.com"]);
        order.validations = [Validation::Pending, Validation::Valid].into();

        solve_challenges(&mut order, &solver).await.unwrap();

        assert_eq!(
            order.events,
            vec![
                "ready a.example.com after 1 upserts",
                "check a.example.com",
                "check a.example.com",
                "ready b.example.com after 2 upserts",
                "check b.example.com",
            ]
        );

        let names = dns
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upsert(r) => Some(format!("set {}", r.name)),
                Call::Delete(r) => Some(format!("remove {}", r.name)),
                Call::Status(_) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "set _acme-challenge.a.example.com",
                "remove _acme-challenge.a.example.com",
                "set _acme-challenge.b.example.com",
                "remove _acme-challenge.b.example.com",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_authorization_still_cleans_up() {
        let dns = Arc::new(ScriptedDns::default());
        let solver = Dns01Solver::new(dns.clone());
        let mut order = FakeOrder::new(dns.clone(), &["a.example.com", "b.example.com"]);
        order.validations = [Validation::Invalid].into();

        let error = solve_challenges(&mut order, &solver).await.unwrap_err();
        let error = error.downcast::<AcmeError>().unwrap();
        assert!(matches!(*error, AcmeError::AuthorizationInvalid(ref d) if d == "a.example.com"));

        assert_eq!(deletes(&dns), 1);
        assert!(!order.events.iter().any(|e| e.contains("b.example.com")));
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_timeout() {
        let dns = Arc::new(ScriptedDns::default());
        let solver = Dns01Solver::new(dns.clone());
        let mut order = FakeOrder::new(dns.clone(), &["a.example.com"]);
        order.validations = std::iter::repeat(Validation::Pending).take(31).collect();

        let error = solve_challenges(&mut order, &solver).await.unwrap_err();
        let error = error.downcast::<AcmeError>().unwrap();
        assert!(matches!(*error, AcmeError::AuthorizationTimeout { attempts: 30, .. }));

        let checks = order.events.iter().filter(|e| e.starts_with("check")).count();
        assert_eq!(checks, 30);
        assert_eq!(deletes(&dns), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn cleanup_failure_after_validation_is_tolerated() {
        let dns = Arc::new(ScriptedDns::default());
        dns.fail_delete("access denied");
        let solver = Dns01Solver::new(dns.clone());
        let mut order = FakeOrder::new(dns.clone(), &["a.example.com", "b.example.com"]);

        solve_challenges(&mut order, &solver).await.unwrap();
        assert_eq!(deletes(&dns), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_skips_validation() {
        let dns = Arc::new(ScriptedDns::default());
        dns.fail_upsert("throttled");
        let solver = Dns01Solver::new(dns.clone());
        let mut order = FakeOrder::new(dns.clone(), &["a.example.com"]);

        let error = solve_challenges(&mut order, &solver).await.unwrap_err();
        let error = error.downcast::<crate::Error>().unwrap();
        assert_eq!(error.stage(), Some(crate::error::Stage::Set));
        assert!(order.events.is_empty());
        assert_eq!(deletes(&dns), 0);
    }
}
