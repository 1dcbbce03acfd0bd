//! Session execution: one work item driven through Worker, QA, and
//! Manager turns until it is merged or a budget runs out.

pub mod circuit_breaker;
pub mod edits;
pub mod executor;
pub mod progress;
pub mod runner;
pub mod signals;
pub mod state;

pub use runner::{Session, SessionOutcome};
pub use signals::SignalStore;
pub use state::Phase;
