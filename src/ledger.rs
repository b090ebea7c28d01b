//! Per-user balance ledger.
//!
//! Wraps a [`BalanceStore`] and serializes every read-latest-then-append for a
//! user behind that user's lock. Two debits racing for the same user can never
//! both read the same prior snapshot, so a balance cannot be overdrawn by
//! concurrent settlement and order submission.

use crate::balance::{Balance, BalanceError};
use crate::store::{BalanceStore, StoreError};
use crate::types::{Timestamp, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockRegistry = Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>;

/// Held while mutating anything owned by `user`.
pub struct UserGuard {
    user: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    cell: Arc<AsyncMutex<()>>,
    registry: LockRegistry,
}

impl UserGuard {
    pub fn user(&self) -> &UserId {
        &self.user
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // release before pruning so a waiter can never hold a pruned cell
        drop(self.guard.take());
        let mut locks = self.registry.lock();
        // one reference here, one in the registry: nobody else is queued
        if Arc::strong_count(&self.cell) == 2 {
            locks.remove(&self.user);
        }
    }
}

pub struct BalanceLedger {
    store: Arc<dyn BalanceStore>,
    locks: LockRegistry,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn lock(&self, user: &UserId) -> UserGuard {
        let cell = {
            let mut locks = self.locks.lock();
            locks
                .entry(user.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = cell.clone().lock_owned().await;
        UserGuard {
            user: user.clone(),
            guard: Some(guard),
            cell,
            registry: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.locks.lock().len()
    }

    /// Unlocked read. Fine for display, not for deciding a mutation.
    pub async fn latest(&self, user: &UserId) -> Result<Balance, LedgerError> {
        self.store.latest_balance(user).await.map_err(LedgerError::Read)
    }

    /// Read the latest snapshot, let `mutate` derive the next one, and append it.
    /// The caller must hold the user's guard for the whole logical update.
    pub async fn apply_locked<F>(
        &self,
        guard: &UserGuard,
        timestamp: Timestamp,
        mutate: F,
    ) -> Result<Balance, LedgerError>
    where
        F: FnOnce(&mut Balance) -> Result<(), BalanceError>,
    {
        let latest = self.latest(guard.user()).await?;
        let mut next = latest.next(timestamp);
        mutate(&mut next).map_err(LedgerError::Rejected)?;
        next.ensure_non_negative().map_err(LedgerError::Rejected)?;
        self.store
            .append_balance(next.clone())
            .await
            .map_err(LedgerError::Write)?;
        Ok(next)
    }

    /// Write a first snapshot for a user who has none.
    pub async fn open(&self, balance: Balance) -> Result<(), LedgerError> {
        let guard = self.lock(&balance.user).await;
        match self.store.latest_balance(guard.user()).await {
            Ok(_) => Err(LedgerError::Read(StoreError::Conflict(format!(
                "balance for {} already exists",
                guard.user()
            )))),
            Err(StoreError::NotFound { .. }) => {
                balance.ensure_non_negative().map_err(LedgerError::Rejected)?;
                self.store
                    .append_balance(balance)
                    .await
                    .map_err(LedgerError::Write)
            }
            Err(e) => Err(LedgerError::Read(e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Balance update rejected: {0}")]
    Rejected(#[from] BalanceError),

    #[error("Balance read failed: {0}")]
    Read(StoreError),

    #[error("Balance write failed: {0}")]
    Write(StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBalances;
    use crate::types::Asset;
    use rust_decimal_macros::dec;

    async fn funded_ledger() -> (Arc<MemoryBalances>, BalanceLedger, UserId) {
        let store = Arc::new(MemoryBalances::new());
        let ledger = BalanceLedger::new(store.clone());
        let user = UserId::new("alice");
        let bal = Balance::with_holdings(
            user.clone(),
            [(Asset::new("USDC"), dec!(100))],
            Timestamp::from_millis(0),
        )
        .unwrap();
        ledger.open(bal).await.unwrap();
        (store, ledger, user)
    }

    async fn apply<F>(
        ledger: &BalanceLedger,
        user: &UserId,
        at: i64,
        mutate: F,
    ) -> Result<Balance, LedgerError>
    where
        F: FnOnce(&mut Balance) -> Result<(), BalanceError>,
    {
        let guard = ledger.lock(user).await;
        ledger.apply_locked(&guard, Timestamp::from_millis(at), mutate).await
    }

    #[tokio::test]
    async fn apply_appends_new_snapshot() {
        let (store, ledger, user) = funded_ledger().await;
        let usdc = Asset::new("USDC");

        let next = apply(&ledger, &user, 1, |b| b.debit(&usdc, dec!(40)))
            .await
            .unwrap();

        assert_eq!(next.quantity(&usdc), dec!(60));
        let history = store.history(&user);
        assert_eq!(history.len(), 2);
        // first snapshot never edited
        assert_eq!(history[0].quantity(&usdc), dec!(100));
    }

    #[tokio::test]
    async fn rejected_mutation_appends_nothing() {
        let (store, ledger, user) = funded_ledger().await;
        let usdc = Asset::new("USDC");

        let result = apply(&ledger, &user, 1, |b| b.debit(&usdc, dec!(101))).await;

        assert!(matches!(result, Err(LedgerError::Rejected(BalanceError::Insufficient { .. }))));
        assert_eq!(store.history(&user).len(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (store, ledger, user) = funded_ledger().await;
        store.set_fail_writes(true);
        let usdc = Asset::new("USDC");
        let result = apply(&ledger, &user, 1, |b| b.credit(&usdc, dec!(1))).await;
        assert!(matches!(result, Err(LedgerError::Write(_))));
    }

    #[tokio::test]
    async fn open_twice_conflicts() {
        let (_, ledger, user) = funded_ledger().await;
        let again = Balance::new(user, Timestamp::from_millis(3));
        assert!(matches!(ledger.open(again).await, Err(LedgerError::Read(StoreError::Conflict(_)))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let (store, ledger, user) = funded_ledger().await;
        let ledger = Arc::new(ledger);
        let usdc = Asset::new("USDC");

        // 20 tasks each try to take 10 out of 100: exactly 10 can succeed
        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            let user = user.clone();
            let usdc = usdc.clone();
            handles.push(tokio::spawn(async move {
                apply(&ledger, &user, 10 + i, |b| b.debit(&usdc, dec!(10)))
                    .await
                    .is_ok()
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() {
                ok += 1;
            }
        }

        assert_eq!(ok, 10);
        let latest = ledger.latest(&user).await.unwrap();
        assert_eq!(latest.quantity(&usdc), dec!(0));
        assert_eq!(store.history(&user).len(), 11);
        assert_eq!(ledger.tracked_users(), 0);
    }

    #[tokio::test]
    async fn idle_user_locks_are_pruned() {
        let (_, ledger, user) = funded_ledger().await;
        assert_eq!(ledger.tracked_users(), 0);

        let guard = ledger.lock(&user).await;
        assert_eq!(ledger.tracked_users(), 1);
        drop(guard);
        assert_eq!(ledger.tracked_users(), 0);

        for i in 0..50 {
            let other = UserId::new(format!("user-{i}"));
            drop(ledger.lock(&other).await);
        }
        assert_eq!(ledger.tracked_users(), 0);
    }

    #[tokio::test]
    async fn queued_waiter_keeps_the_lock_entry() {
        let (_, ledger, user) = funded_ledger().await;
        let ledger = Arc::new(ledger);
        let first = ledger.lock(&user).await;

        let waiter = {
            let ledger = ledger.clone();
            let user = user.clone();
            tokio::spawn(async move {
                let guard = ledger.lock(&user).await;
                ledger.tracked_users() == 1 && guard.user() == &user
            })
        };
        while Arc::strong_count(&first.cell) < 3 {
            tokio::task::yield_now().await;
        }

        drop(first);
        // the waiter's clone keeps the cell registered
        assert!(waiter.await.unwrap());
        assert_eq!(ledger.tracked_users(), 0);
    }
}
