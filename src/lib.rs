// paper-core: paper trading settlement engine.
// users trade spot and open isolated leveraged positions against oracle prices.
// a periodic sweep executes pending orders and revalues, liquidates or closes positions.
// persistence, prices and notification delivery live behind traits in store.rs.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, Asset, ids, Side, Price, Quote, Leverage
//   2.x  order.rs: order kinds, validation, readiness, fill math
//   3.x  valuation.rs: position value and liquidation price
//   4.x  position.rs: position lifecycle, close conditions
//   5.x  balance.rs: immutable balance snapshots
//   6.x  ledger.rs: per user serialized read-latest-then-append
//   7.x  config.rs: engine limits and sweep schedule, presets
//   8.x  engine/: submission, execution, close, portfolio, sweep, scheduler
//   9.x  store.rs: collaborator traits. memory.rs: in-memory versions
//   11.x events.rs: state transition events and user messages

pub mod balance;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod memory;
pub mod order;
pub mod position;
pub mod store;
pub mod types;
pub mod valuation;

// re exports for convenience
pub use balance::*;
pub use config::*;
pub use engine::*;
pub use events::*;
pub use ledger::*;
pub use order::*;
pub use position::*;
pub use store::*;
pub use types::*;
pub use valuation::*;
pub use memory::MemoryBackend;
