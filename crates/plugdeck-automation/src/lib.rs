//! Automation engine for plugdeck.
//!
//! Items are rules stored as an ordered JSON array: triggers (time of day or
//! protocol text) start an item, a two-level condition tree gates it, an
//! optional confirmation prompt can veto it, and its actions run in order.
//! Plugin-declared periods and minute triggers fire from the same tick.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use plugdeck_automation::{AutomationEngine, scheduler};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = Arc::new(AutomationEngine::from_config(ctx.config(), ctx.clone())?);
//! let cancel = CancellationToken::new();
//! tokio::spawn(scheduler::run(engine.clone(), cancel.clone()));
//! ```

mod condition;
mod confirm;
mod engine;
mod executor;
mod gateway;
mod interpolate;
mod model;
mod parity;
mod store;

pub mod scheduler;

pub use condition::{EvalContext, evaluate, evaluate_group, evaluate_predicate};
pub use confirm::{
    ChannelPrompt, ConfirmPrompt, ConfirmRequest, Decision, PendingConfirm, PendingPrompt, confirm,
};
pub use engine::{AutomationEngine, RunReport, RunStatus, TickReport};
pub use executor::{
    ActionExecutor, ActionKind, ActionOutcome, CommandRunner, PowerOp, TokioCommandRunner,
};
pub use gateway::{DEFAULT_VARIABLE_GETTER, PluginGateway};
pub use interpolate::{PROTOCOL_SOURCE, interpolate, interpolate_value};
pub use model::{
    Action, AutomationItem, Confirm, ConditionGroup, Conditions, Mode, Predicate, Trigger,
    normalize_protocol,
};
pub use parity::{Biweek, Parity};
pub use store::AutomationStore;
