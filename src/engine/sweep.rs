//! The settlement sweep.
//!
//! Three ordered phases: pending market orders, pending limit orders, then every
//! live position. Each entity runs in its own task under a timeout, and one
//! entity failing never stops the rest. A task that overruns its timeout is left
//! to finish on its own so no entity is abandoned half mutated.

use super::core::Engine;
use super::results::{OrderOutcome, SettleError, SweepReport};
use crate::order::PendingGroup;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

impl Engine {
    pub async fn run_sweep(
        &self,
        entity_timeout: Duration,
        shutdown: &watch::Receiver<bool>,
    ) -> SweepReport {
        let started = Instant::now();
        let span = info_span!("sweep");
        let report = self
            .sweep_phases(entity_timeout, shutdown)
            .instrument(span)
            .await;

        info!(
            filled = report.orders_filled,
            opened = report.positions_opened,
            rejected = report.orders_rejected,
            waiting = report.orders_waiting,
            valued = report.positions_valued,
            liquidated = report.positions_liquidated,
            closed = report.positions_closed,
            skipped = report.skipped,
            failed = report.failed(),
            timed_out = report.timed_out,
            interrupted = report.interrupted,
            unrecorded = report.unrecorded.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sweep finished"
        );
        report
    }

    async fn sweep_phases(
        &self,
        entity_timeout: Duration,
        shutdown: &watch::Receiver<bool>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        // phases 1 and 2. limit orders are tested for readiness inside execute_order
        for group in [PendingGroup::Market, PendingGroup::Limit] {
            let orders = match self.stores.orders.list_pending(group).await {
                Ok(orders) => orders,
                Err(e) => {
                    error!(group = ?group, error = %e, "could not list pending orders");
                    report.record_failure(format!("{group:?} orders"), SettleError::Read(e));
                    continue;
                }
            };

            for order in orders {
                if stopping(shutdown) {
                    report.interrupted = true;
                    return report;
                }
                let label = format!("order {}", order.id);
                let engine = self.clone();
                let result = run_entity(label.clone(), entity_timeout, async move {
                    engine.execute_order(order.id).await
                })
                .await;
                match result {
                    Ok(outcome) => {
                        report.record_order(&outcome);
                        if let OrderOutcome::Filled { unrecorded: Some(e), .. } = outcome {
                            report.record_unrecorded(label, e);
                        }
                    }
                    Err(e) => {
                        warn!(entity = %label, kind = ?e.kind(), error = %e, "order skipped");
                        report.record_failure(label, e);
                    }
                }
            }
        }

        // phase 3
        let positions = match self.stores.positions.list_live().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "could not list live positions");
                report.record_failure("live positions".to_string(), SettleError::Read(e));
                return report;
            }
        };

        for position in positions {
            if stopping(shutdown) {
                report.interrupted = true;
                return report;
            }
            let label = format!("position {}", position.id);
            let engine = self.clone();
            let result = run_entity(label.clone(), entity_timeout, async move {
                engine.settle_position(&position).await
            })
            .await;
            match result {
                Ok((outcome, unrecorded)) => {
                    report.record_position(&outcome);
                    if let Some(e) = unrecorded {
                        report.record_unrecorded(label, e);
                    }
                }
                Err(e) => {
                    warn!(entity = %label, kind = ?e.kind(), error = %e, "position skipped");
                    report.record_failure(label, e);
                }
            }
        }

        report
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

// spawn so a timeout detaches the task instead of dropping it mid entity
async fn run_entity<T, F>(label: String, timeout: Duration, work: F) -> Result<T, SettleError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, SettleError>> + Send + 'static,
{
    let handle = tokio::spawn(work);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(SettleError::Aborted {
            entity: label,
            reason: join.to_string(),
        }),
        Err(_) => Err(SettleError::Timeout {
            entity: label,
            after: timeout,
        }),
    }
}
