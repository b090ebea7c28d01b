//! Collaborator interfaces consumed by the settlement core.
//!
//! Persistence, price data, user lookup and notification delivery live outside
//! this crate. The engine only talks to them through these traits, which keeps
//! the settlement logic testable against the in-memory versions in
//! [`crate::memory`].

use crate::balance::Balance;
use crate::order::{Order, PendingGroup, Trade};
use crate::position::Position;
use crate::types::{Asset, OrderId, Price, PositionId, UserId};
use crate::valuation::PositionValuation;
use async_trait::async_trait;

/// Where to deliver notifications for a user (a chat channel id, a queue name...).
pub type ChannelId = String;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest known usd price for `asset`.
    async fn latest_price(&self, asset: &Asset) -> Result<Price, OracleError>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Most recent snapshot for `user`.
    async fn latest_balance(&self, user: &UserId) -> Result<Balance, StoreError>;

    /// Persist a new snapshot. Snapshots are never overwritten.
    async fn append_balance(&self, balance: Balance) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn list_pending(&self, group: PendingGroup) -> Result<Vec<Order>, StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn insert(&self, group: PendingGroup, order: Order) -> Result<(), StoreError>;

    /// Remove a pending order. Returns false if it was already gone.
    async fn delete(&self, id: OrderId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn list_live(&self) -> Result<Vec<Position>, StoreError>;

    async fn get(&self, id: PositionId) -> Result<Option<Position>, StoreError>;

    async fn insert(&self, position: Position) -> Result<(), StoreError>;

    async fn update(&self, position: Position) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ValuationStore: Send + Sync {
    async fn append(&self, valuation: PositionValuation) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn append(&self, trade: Trade) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &ChannelId, message: &str) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn channel_of(&self, user: &UserId) -> Result<ChannelId, StoreError>;

    /// Register a new user. Fails with `Conflict` if the user exists.
    async fn register(&self, user: &UserId, channel: ChannelId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("No price for {0}")]
    UnknownAsset(Asset),

    #[error("Oracle unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery to {channel} failed: {reason}")]
    Delivery { channel: ChannelId, reason: String },
}
