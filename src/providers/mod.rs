//! Background refresh daemons (C1, C2, C3) and the shared refresh-loop
//! plumbing they're built on.

pub mod jwk_provider;
pub mod key_provider;
pub mod policy_store;

pub use jwk_provider::JwkProvider;
pub use key_provider::KeyProvider;
pub use policy_store::PolicyStore;

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Channel capacity for a single provider's own refresh-outcome stream.
///
/// Small and internal: the supervisor drains it immediately and re-emits
/// onto its own capacity-200 fan-in channel (§4.7), so this only needs to
/// absorb the gap between two consecutive supervisor polls.
const PROVIDER_CHANNEL_CAPACITY: usize = 16;

/// Spawn a scheduled refresh loop that calls `update` on every tick of
/// `period`, retrying a failed attempt with `backon`'s exponential
/// backoff bounded by `retry_delay`, and reports every attempt's final
/// outcome on the returned channel. Terminates exactly when `token` is
/// cancelled (§4.1, §5).
pub(crate) fn spawn_refresh_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    retry_delay: Duration,
    token: CancellationToken,
    mut update: F,
) -> mpsc::Receiver<Result<()>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let (tx, rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(provider = name, "refresh loop stopping on cancellation");
                    break;
                }
                _ = ticker.tick() => {
                    let backoff = ExponentialBuilder::default()
                        .with_min_delay(retry_delay)
                        .with_max_delay(retry_delay)
                        .with_max_times(1);
                    let retried = (|| update())
                        .retry(backoff)
                        .notify(|err: &Error, dur: Duration| {
                            warn!(provider = name, error = %err, delay = ?dur, "refresh attempt failed, retrying");
                        });

                    let outcome = tokio::select! {
                        () = token.cancelled() => break,
                        outcome = retried => outcome,
                    };

                    if outcome.is_ok() {
                        debug!(provider = name, "refresh succeeded");
                    }
                    if tx.try_send(outcome).is_err() {
                        warn!(provider = name, "refresh outcome dropped: channel full or closed");
                    }
                }
            }
        }
    });

    rx
}
