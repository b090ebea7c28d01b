// 9.0 memory.rs: in-memory collaborators. used by tests and the simulation binary.
// every store can be told to fail so error paths can be exercised.

use crate::balance::Balance;
use crate::engine::Collaborators;
use crate::order::{Order, PendingGroup, Trade};
use crate::position::Position;
use crate::store::{
    BalanceStore, ChannelId, NotifyError, Notifier, OracleError, OrderStore, PositionStore,
    PriceOracle, StoreError, TradeStore, UserDirectory, ValuationStore,
};
use crate::types::{Asset, OrderId, Price, PositionId, UserId};
use crate::valuation::PositionValuation;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MemoryOracle {
    prices: RwLock<HashMap<Asset, Price>>,
    broken: RwLock<HashSet<Asset>>,
    delays: RwLock<HashMap<Asset, Duration>>,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, asset: &Asset, price: Price) {
        self.prices.write().insert(asset.clone(), price);
    }

    // lookups for this asset fail until cleared
    pub fn break_asset(&self, asset: &Asset) {
        self.broken.write().insert(asset.clone());
    }

    pub fn repair_asset(&self, asset: &Asset) {
        self.broken.write().remove(asset);
    }

    // lookups for this asset sleep first, to exercise timeouts
    pub fn set_delay(&self, asset: &Asset, delay: Duration) {
        self.delays.write().insert(asset.clone(), delay);
    }
}

#[async_trait]
impl PriceOracle for MemoryOracle {
    async fn latest_price(&self, asset: &Asset) -> Result<Price, OracleError> {
        let delay = self.delays.read().get(asset).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.read().contains(asset) {
            return Err(OracleError::Unavailable(format!("feed for {asset} is down")));
        }
        self.prices
            .read()
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::UnknownAsset(asset.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryBalances {
    history: RwLock<HashMap<UserId, Vec<Balance>>>,
    fail_writes: AtomicBool,
}

impl MemoryBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, user: &UserId) -> Vec<Balance> {
        self.history.read().get(user).cloned().unwrap_or_default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BalanceStore for MemoryBalances {
    async fn latest_balance(&self, user: &UserId) -> Result<Balance, StoreError> {
        self.history
            .read()
            .get(user)
            // insertion order, like an auto-increment key. wall clocks can go backwards
            .and_then(|snapshots| snapshots.last().cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: "balance",
                id: user.to_string(),
            })
    }

    async fn append_balance(&self, balance: Balance) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("balance writes disabled".to_string()));
        }
        self.history
            .write()
            .entry(balance.user.clone())
            .or_default()
            .push(balance);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryOrders {
    orders: RwLock<Vec<(PendingGroup, Order)>>,
    fail_deletes: AtomicBool,
}

impl MemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for MemoryOrders {
    async fn list_pending(&self, group: PendingGroup) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .iter()
            .filter(|(g, _)| *g == group)
            .map(|(_, order)| order.clone())
            .collect())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .iter()
            .find(|(_, order)| order.id == id)
            .map(|(_, order)| order.clone()))
    }

    async fn insert(&self, group: PendingGroup, order: Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write();
        if orders.iter().any(|(_, o)| o.id == order.id) {
            return Err(StoreError::Conflict(format!("order {} exists", order.id)));
        }
        orders.push((group, order));
        Ok(())
    }

    async fn delete(&self, id: OrderId) -> Result<bool, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order deletes disabled".to_string()));
        }
        let mut orders = self.orders.write();
        let before = orders.len();
        orders.retain(|(_, order)| order.id != id);
        Ok(orders.len() < before)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPositions {
    positions: RwLock<HashMap<PositionId, Position>>,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.read().values().cloned().collect();
        all.sort_by_key(|p| p.start);
        all
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionStore for MemoryPositions {
    async fn list_live(&self) -> Result<Vec<Position>, StoreError> {
        let mut live: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| p.is_alive())
            .cloned()
            .collect();
        live.sort_by_key(|p| p.start);
        Ok(live)
    }

    async fn get(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        Ok(self.positions.read().get(&id).cloned())
    }

    async fn insert(&self, position: Position) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("position inserts disabled".to_string()));
        }
        let mut positions = self.positions.write();
        if positions.contains_key(&position.id) {
            return Err(StoreError::Conflict(format!("position {} exists", position.id)));
        }
        positions.insert(position.id, position);
        Ok(())
    }

    async fn update(&self, position: Position) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("position updates disabled".to_string()));
        }
        let mut positions = self.positions.write();
        match positions.get_mut(&position.id) {
            Some(existing) => {
                *existing = position;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "position",
                id: position.id.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryValuations {
    records: RwLock<Vec<PositionValuation>>,
    fail_writes: AtomicBool,
}

impl MemoryValuations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_position(&self, id: PositionId) -> Vec<PositionValuation> {
        self.records
            .read()
            .iter()
            .filter(|v| v.position == id)
            .cloned()
            .collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ValuationStore for MemoryValuations {
    async fn append(&self, valuation: PositionValuation) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("valuation writes disabled".to_string()));
        }
        self.records.write().push(valuation);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTrades {
    trades: RwLock<Vec<Trade>>,
    fail_writes: AtomicBool,
}

impl MemoryTrades {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Trade> {
        self.trades.read().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TradeStore for MemoryTrades {
    async fn append(&self, trade: Trade) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("trade writes disabled".to_string()));
        }
        self.trades.write().push(trade);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: RwLock<Vec<(ChannelId, String)>>,
    fail: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.read().clone()
    }

    pub fn messages_to(&self, channel: &str) -> Vec<String> {
        self.sent
            .read()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, channel: &ChannelId, message: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery {
                channel: channel.clone(),
                reason: "notifier offline".to_string(),
            });
        }
        self.sent.write().push((channel.clone(), message.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    channels: RwLock<HashMap<UserId, ChannelId>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn channel_of(&self, user: &UserId) -> Result<ChannelId, StoreError> {
        self.channels
            .read()
            .get(user)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "user",
                id: user.to_string(),
            })
    }

    async fn register(&self, user: &UserId, channel: ChannelId) -> Result<(), StoreError> {
        let mut channels = self.channels.write();
        if channels.contains_key(user) {
            return Err(StoreError::Conflict(format!("user {user} already registered")));
        }
        channels.insert(user.clone(), channel);
        Ok(())
    }
}

/// All in-memory collaborators, kept concrete so tests can poke at them.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub oracle: Arc<MemoryOracle>,
    pub balances: Arc<MemoryBalances>,
    pub orders: Arc<MemoryOrders>,
    pub positions: Arc<MemoryPositions>,
    pub valuations: Arc<MemoryValuations>,
    pub trades: Arc<MemoryTrades>,
    pub notifier: Arc<MemoryNotifier>,
    pub directory: Arc<MemoryDirectory>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            oracle: self.oracle.clone(),
            balances: self.balances.clone(),
            orders: self.orders.clone(),
            positions: self.positions.clone(),
            valuations: self.valuations.clone(),
            trades: self.trades.clone(),
            notifier: self.notifier.clone(),
            directory: self.directory.clone(),
        }
    }
}
