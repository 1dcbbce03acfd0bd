#![forbid(unsafe_code)]

//! Orchestrator and session runner for autonomous coding agents.

use std::future::Future;
use std::pin::Pin;

pub mod config;
pub mod errors;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod persistence;
pub mod proposer;
pub mod session;
pub mod source;
pub mod vcs;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

/// Boxed future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
