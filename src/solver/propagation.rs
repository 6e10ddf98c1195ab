use crate::{
    dns::{ChangeHandle, ChangeStatus, DnsProvider},
    error::{Error, Result, Stage},
};
use std::{sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, instrument};

/// Default time between two status checks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of pending checks tolerated before giving up, about ten minutes with the
/// default interval
pub const DEFAULT_MAX_ATTEMPTS: usize = 600;

/// Polls a [`DnsProvider`] until a submitted change has been applied.
pub struct PropagationWaiter {
    provider: Arc<dyn DnsProvider>,
    interval: Duration,
    max_attempts: usize,
}

impl PropagationWaiter {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        PropagationWaiter {
            provider,
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the time between status checks, defaults to 1 second
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the number of pending checks tolerated, defaults to 600. The wait fails on the
    /// check that exceeds it, so up to `attempts + 1` checks are made.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait until the provider reports the change as applied.
    ///
    /// Sleeps only between checks. A provider error ends the wait immediately.
    #[instrument(level = "debug", skip(self), fields(%change))]
    pub async fn wait_until_propagated(&self, change: &ChangeHandle) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let status = self
                .provider
                .change_status(change)
                .await
                .map_err(|source| Error::Provider {
                    stage: Stage::Wait,
                    name: change.to_string(),
                    source,
                })?;

            match status {
                ChangeStatus::Done => {
                    debug!(attempt, "change propagated");
                    return Ok(());
                }
                ChangeStatus::Pending if attempt > self.max_attempts => {
                    return Err(Error::PropagationTimeout {
                        change: change.to_string(),
                        attempts: attempt,
                    });
                }
                ChangeStatus::Pending => {
                    debug!(attempt, "change still pending");
                    time::sleep(self.interval).await;
                }
            }
        }
    }
}
