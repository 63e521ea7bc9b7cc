//! Serialized reconcile loop with exponential backoff.

use async_trait::async_trait;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::trigger::TriggerReceiver;

/// A full-resync task driven by [`run_reconcile_loop`].
///
/// Each call to [`reconcile`](Reconcile::reconcile) is one complete pass.
/// An error means the whole pass must be retried.
#[async_trait]
pub trait Reconcile: Send {
    type Error: Display + Send;

    /// Returns the name of this reconciler (for logging).
    fn name(&self) -> &str;

    async fn reconcile(&mut self) -> Result<(), Self::Error>;
}

/// Retry delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff state: `initial`, `2 * initial`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            next: policy.initial,
        }
    }

    /// Returns the delay to wait before the next retry and advances the state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.policy.max);
        self.next = delay.saturating_mul(2).min(self.policy.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.policy.initial;
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub passes: u64,
    pub failures: u64,
}

/// Runs `reconciler` once per trigger until `shutdown` is cancelled or every
/// trigger sender is dropped.
///
/// A failed pass is retried after the next backoff delay; a successful pass
/// resets the backoff. A trigger arriving while a retry is scheduled runs the
/// pass immediately.
pub async fn run_reconcile_loop<R: Reconcile>(
    reconciler: &mut R,
    mut triggers: TriggerReceiver,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
) -> LoopStats {
    let mut backoff = Backoff::new(policy);
    let mut retry_at: Option<Instant> = None;
    let mut stats = LoopStats::default();

    info!(reconciler = reconciler.name(), "Reconcile loop started");

    loop {
        let retry = async move {
            match retry_at {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            alive = triggers.wait() => {
                if !alive {
                    debug!(reconciler = reconciler.name(), "All triggers dropped");
                    break;
                }
            }
            _ = retry => {
                debug!(reconciler = reconciler.name(), "Retrying failed pass");
            }
        }

        stats.passes += 1;
        match reconciler.reconcile().await {
            Ok(()) => {
                backoff.reset();
                retry_at = None;
            }
            Err(e) => {
                stats.failures += 1;
                let delay = backoff.next_delay();
                warn!(
                    reconciler = reconciler.name(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile pass failed"
                );
                retry_at = Some(Instant::now() + delay);
            }
        }
    }

    info!(
        reconciler = reconciler.name(),
        passes = stats.passes,
        failures = stats.failures,
        "Reconcile loop stopped"
    );
    stats
}
