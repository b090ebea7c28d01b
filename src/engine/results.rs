// 8.0.2: result types and errors for engine operations.

use crate::balance::BalanceError;
use crate::events::CloseReason;
use crate::ledger::LedgerError;
use crate::order::{OrderError, Trade};
use crate::position::{Position, PositionError};
use crate::store::{OracleError, StoreError};
use crate::types::{Asset, Overflow, PositionId, Quote, UserId};
use rust_decimal::Decimal;
use std::time::Duration;

/// What happened to one pending order when the engine tried to execute it.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    /// Spot swap settled against the balance. `unrecorded` is set when the
    /// balance moved but the trade history write failed.
    Filled {
        trade: Trade,
        unrecorded: Option<SettleError>,
    },
    /// Levered order turned into a live position.
    Opened(Position),
    /// Funds no longer cover the order. It has been deleted.
    Rejected {
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },
    /// Priced order whose target has not been crossed yet. Left pending.
    Waiting,
    /// Already executed or cancelled by someone else.
    Gone,
}

#[derive(Debug, Clone)]
pub enum PositionOutcome {
    /// Still open, value recorded.
    Valued(Quote),
    Liquidated {
        value: Quote,
    },
    Closed {
        value: Quote,
        award: Decimal,
        reason: CloseReason,
    },
    /// Closed by someone else first.
    Gone,
}

// 8.0.3: one line per sweep in the logs
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub orders_filled: usize,
    pub positions_opened: usize,
    pub orders_rejected: usize,
    pub orders_waiting: usize,
    pub positions_valued: usize,
    pub positions_liquidated: usize,
    pub positions_closed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    // entity label and the error it hit. never aborts the sweep
    pub failures: Vec<(String, SettleError)>,
    // history writes that failed after the entity's state change was persisted
    pub unrecorded: Vec<(String, SettleError)>,
    // shutdown requested before every entity was visited
    pub interrupted: bool,
}

impl SweepReport {
    pub(super) fn record_order(&mut self, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Filled { .. } => self.orders_filled += 1,
            OrderOutcome::Opened(_) => self.positions_opened += 1,
            OrderOutcome::Rejected { .. } => self.orders_rejected += 1,
            OrderOutcome::Waiting => self.orders_waiting += 1,
            OrderOutcome::Gone => self.skipped += 1,
        }
    }

    pub(super) fn record_position(&mut self, outcome: &PositionOutcome) {
        match outcome {
            PositionOutcome::Valued(_) => self.positions_valued += 1,
            PositionOutcome::Liquidated { .. } => self.positions_liquidated += 1,
            PositionOutcome::Closed { .. } => {
                self.positions_valued += 1;
                self.positions_closed += 1;
            }
            PositionOutcome::Gone => self.skipped += 1,
        }
    }

    pub(super) fn record_failure(&mut self, entity: String, error: SettleError) {
        if error.kind() == ErrorKind::Timeout {
            self.timed_out += 1;
        }
        self.failures.push((entity, error));
    }

    pub(super) fn record_unrecorded(&mut self, entity: String, error: SettleError) {
        self.unrecorded.push((entity, error));
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Coarse classification used to decide what happens to the entity next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // bad input or insufficient funds. rejected, nothing mutated
    Validation,
    // price or read failure. retried next sweep
    Lookup,
    // write failed after a valid computation. may be inconsistent
    Persistence,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettleError {
    #[error("Order rejected: {0}")]
    Order(#[from] OrderError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Balance rejected: {0}")]
    Balance(BalanceError),

    #[error("Position {position} does not belong to {user}")]
    NotOwner { user: UserId, position: PositionId },

    #[error("Account {0} already exists")]
    AccountExists(UserId),

    #[error("Price lookup failed: {0}")]
    Price(#[from] OracleError),

    #[error("Read failed: {0}")]
    Read(StoreError),

    #[error("Write failed: {0}")]
    Write(StoreError),

    #[error("{entity} timed out after {after:?}")]
    Timeout { entity: String, after: Duration },

    #[error("{entity} task died: {reason}")]
    Aborted { entity: String, reason: String },

    #[error("Settlement math out of range: {0}")]
    OutOfRange(#[from] Overflow),
}

impl SettleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettleError::Order(_)
            | SettleError::Position(_)
            | SettleError::Balance(_)
            | SettleError::NotOwner { .. }
            | SettleError::AccountExists(_)
            | SettleError::OutOfRange(_) => ErrorKind::Validation,
            SettleError::Price(_) | SettleError::Read(_) => ErrorKind::Lookup,
            SettleError::Write(_) | SettleError::Aborted { .. } => ErrorKind::Persistence,
            SettleError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

impl From<LedgerError> for SettleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(e) => SettleError::Balance(e),
            LedgerError::Read(e) => SettleError::Read(e),
            LedgerError::Write(e) => SettleError::Write(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_kinds() {
        let insufficient = SettleError::from(LedgerError::Rejected(BalanceError::Insufficient {
            asset: Asset::new("USDC"),
            requested: dec!(2),
            available: dec!(1),
        }));
        assert_eq!(insufficient.kind(), ErrorKind::Validation);

        let price = SettleError::from(OracleError::UnknownAsset(Asset::new("XYZ")));
        assert_eq!(price.kind(), ErrorKind::Lookup);

        let write = SettleError::from(LedgerError::Write(StoreError::Unavailable("down".into())));
        assert_eq!(write.kind(), ErrorKind::Persistence);

        let overflow = SettleError::from(Overflow::at("position value"));
        assert_eq!(overflow.kind(), ErrorKind::Validation);
    }

    #[test]
    fn timeouts_are_counted() {
        let mut report = SweepReport::default();
        report.record_failure(
            "order x".to_string(),
            SettleError::Timeout {
                entity: "order x".to_string(),
                after: Duration::from_millis(5),
            },
        );
        report.record_failure(
            "position y".to_string(),
            SettleError::Read(StoreError::Unavailable("down".into())),
        );
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.failed(), 2);
    }

    #[test]
    fn unrecorded_history_is_not_a_failure() {
        let mut report = SweepReport::default();
        report.record_unrecorded(
            "position z".to_string(),
            SettleError::Write(StoreError::Unavailable("down".into())),
        );
        assert_eq!(report.failed(), 0);
        assert_eq!(report.unrecorded.len(), 1);
    }
}
