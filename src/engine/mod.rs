// 8.0: settlement engine. order submission and execution, position close, portfolio views,
// and the periodic sweep that drives all of it. state lives behind the collaborator traits.

mod core;
mod orders;
mod portfolio;
mod positions;
mod pricing;
mod results;
mod scheduler;
mod sweep;

pub use core::{Collaborators, Engine};
pub use portfolio::{Portfolio, PositionView};
pub use results::{ErrorKind, OrderOutcome, PositionOutcome, SettleError, SweepReport};
pub use scheduler::Scheduler;
