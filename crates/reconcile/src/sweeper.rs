//! Expiry sweeper.
//!
//! Single periodic job that force-resolves reservations past their payment
//! deadline. It never assumes non-payment: each candidate gets one final
//! gateway poll, fed through the orchestrator's shared transition path, so a
//! payment that settled just before the deadline confirms instead of being
//! cancelled. The sweeper keeps no state of its own — it is idempotent by
//! construction, and restart-and-rescan is its whole recovery story.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::ReservationStatus;
use ledger::LedgerStore;

use crate::gateway::PaymentGateway;
use crate::orchestrator::Orchestrator;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired pending reservations found by the scan.
    pub scanned: usize,

    /// Settled at the final poll and confirmed.
    pub confirmed: usize,

    /// Cancelled for expiry or gateway failure.
    pub cancelled: usize,

    /// Left alone: gateway unreachable, already resolved by a concurrent
    /// event, or a per-reservation error.
    pub skipped: usize,
}

/// Background process that sweeps expired reservations.
pub struct Sweeper<L, G>
where
    L: LedgerStore,
    G: PaymentGateway,
{
    orchestrator: Arc<Orchestrator<L, G>>,
    interval: Duration,
}

impl<L, G> Sweeper<L, G>
where
    L: LedgerStore,
    G: PaymentGateway,
{
    /// Creates a sweeper that ticks at the given interval.
    pub fn new(orchestrator: Arc<Orchestrator<L, G>>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs the sweep loop until the task is dropped or aborted.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// Performs one sweep pass.
    ///
    /// Per-reservation errors are logged and skipped; one bad record never
    /// halts the scan.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> SweepStats {
        let start = std::time::Instant::now();
        metrics::counter!("sweeper_runs_total").increment(1);

        let now = Utc::now();
        let expired = match self
            .orchestrator
            .ledger
            .expired_pending_reservations(now)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                tracing::error!(error = %err, "expiry scan failed; retrying next tick");
                return SweepStats::default();
            }
        };

        let mut stats = SweepStats {
            scanned: expired.len(),
            ..SweepStats::default()
        };

        for reservation_id in expired {
            let current = match self.orchestrator.ledger.reservation(reservation_id).await {
                Ok(Some(current)) => current,
                Ok(None) => {
                    stats.skipped += 1;
                    continue;
                }
                Err(err) => {
                    tracing::error!(%reservation_id, error = %err, "sweep read failed; continuing");
                    stats.skipped += 1;
                    continue;
                }
            };

            // One final poll before cancelling, so a payment that settled
            // just before the deadline is confirmed, not thrown away.
            let Some(status) = self.orchestrator.poll_order(&current.record).await else {
                stats.skipped += 1;
                continue;
            };

            match self
                .orchestrator
                .apply_status(reservation_id, &status)
                .await
            {
                Ok(ReservationStatus::Confirmed) => stats.confirmed += 1,
                Ok(ReservationStatus::Cancelled) => stats.cancelled += 1,
                Ok(_) => stats.skipped += 1,
                Err(err) => {
                    tracing::error!(%reservation_id, error = %err, "sweep transition failed; continuing");
                    stats.skipped += 1;
                }
            }
        }

        metrics::histogram!("sweep_duration_seconds").record(start.elapsed().as_secs_f64());
        metrics::counter!("sweeper_cancelled_total").increment(stats.cancelled as u64);
        if stats.scanned > 0 {
            tracing::info!(
                scanned = stats.scanned,
                confirmed = stats.confirmed,
                cancelled = stats.cancelled,
                skipped = stats.skipped,
                "sweep pass finished"
            );
        }
        stats
    }
}
