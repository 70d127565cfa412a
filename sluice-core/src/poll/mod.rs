//! The poll cycle: one tick lists the source, reconciles the backlog,
//! reserves a batch, hands it to the dispatcher and acknowledges the result.

mod driver;
mod trigger;

pub use driver::{PollDriver, PollDriverBuilder, TickOutcome, TickReport, TickSettings};
pub use trigger::{OneShotTrigger, PeriodicTrigger, TriggerContext, TriggerPolicy};
