pub mod linear;

use std::{ops::Deref, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::base::types::Void;

// Traits.

/// Generic issue-tracker client trait.
///
/// The intake core never mutates tickets itself; it only needs to know the
/// tracker is reachable before it starts handing work to the triager.
#[async_trait]
pub trait GenericTrackerClient: Send + Sync + 'static {
    /// Check connectivity and credentials.
    async fn ping(&self) -> Void;
}

// Structs.

/// Tracker client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct TrackerClient {
    inner: Arc<dyn GenericTrackerClient>,
}

impl Deref for TrackerClient {
    type Target = dyn GenericTrackerClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl TrackerClient {
    pub fn new(inner: Arc<dyn GenericTrackerClient>) -> Self {
        Self { inner }
    }

    /// Ping the tracker, retrying with exponential backoff.
    ///
    /// Fails once `max_attempts` pings have failed.
    #[instrument(name = "TrackerClient::connect", skip(self))]
    pub async fn connect(&self, max_attempts: u32, base_delay: Duration) -> Void {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.ping().await {
                Ok(()) => {
                    info!("Tracker reachable after {} attempt(s).", attempt);
                    return Ok(());
                }
                Err(err) if attempt >= max_attempts => {
                    return Err(anyhow::anyhow!("Tracker unreachable after {max_attempts} attempts: {err}"));
                }
                Err(err) => {
                    let delay = backoff_delay(base_delay, attempt);
                    warn!("Tracker ping failed, retrying {attempt}/{max_attempts} in {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FlakyTracker {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenericTrackerClient for FlakyTracker {
        async fn ping(&self) -> Void {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures { Err(anyhow::anyhow!("connection refused")) } else { Ok(()) }
        }
    }

    fn tracker(failures: u32) -> (TrackerClient, Arc<FlakyTracker>) {
        let inner = Arc::new(FlakyTracker { failures, calls: AtomicU32::new(0) });
        (TrackerClient::new(inner.clone()), inner)
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);

        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn connect_retries_until_success() {
        let (client, inner) = tracker(2);

        client.connect(5, Duration::from_millis(1)).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        let (client, inner) = tracker(10);

        let result = client.connect(3, Duration::from_millis(1)).await;

        assert!(result.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
