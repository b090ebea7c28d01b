// 8.0 engine/core.rs: main engine. holds the collaborators, the per-user ledger, the audit trail.

use crate::config::{ConfigError, EngineConfig};
use crate::events::{Event, EventId, EventPayload};
use crate::ledger::BalanceLedger;
use crate::store::{
    BalanceStore, Notifier, OrderStore, PositionStore, PriceOracle, TradeStore, UserDirectory,
    ValuationStore,
};
use crate::types::{Timestamp, UserId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything the engine talks to outside this crate.
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub balances: Arc<dyn BalanceStore>,
    pub orders: Arc<dyn OrderStore>,
    pub positions: Arc<dyn PositionStore>,
    pub valuations: Arc<dyn ValuationStore>,
    pub trades: Arc<dyn TradeStore>,
    pub notifier: Arc<dyn Notifier>,
    pub directory: Arc<dyn UserDirectory>,
}

/** 8.1: main engine struct. cheap to clone, every clone shares the same state */
#[derive(Clone)]
pub struct Engine {
    pub(super) config: Arc<EngineConfig>,
    pub(super) stores: Collaborators,
    pub(super) ledger: Arc<BalanceLedger>,
    pub(super) events: Arc<Mutex<VecDeque<Event>>>,
    pub(super) next_event_id: Arc<AtomicU64>,
}

impl Engine {
    pub fn new(config: EngineConfig, stores: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let ledger = BalanceLedger::new(stores.balances.clone());
        Ok(Self {
            config: Arc::new(config),
            stores,
            ledger: Arc::new(ledger),
            events: Arc::new(Mutex::new(VecDeque::new())),
            next_event_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub(super) fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        let events = self.events.lock();
        let start = events.len().saturating_sub(count);
        events.iter().skip(start).cloned().collect()
    }

    pub fn events_for(&self, user: &UserId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.user == user)
            .cloned()
            .collect()
    }

    // record the event, then tell the user. delivery is best effort
    pub(super) async fn emit_event(&self, user: &UserId, payload: EventPayload) {
        let message = payload.to_string();
        self.record_event(user, payload);

        let channel = match self.stores.directory.channel_of(user).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(user = %user, error = %e, "no notification channel");
                return;
            }
        };
        if let Err(e) = self.stores.notifier.notify(&channel, &message).await {
            warn!(user = %user, error = %e, "notification failed");
        }
    }

    fn record_event(&self, user: &UserId, payload: EventPayload) {
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::Relaxed));
        let event = Event::new(id, self.now(), user.clone(), payload);
        debug!(event_id = id.0, user = %user, "event recorded");

        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }
}
