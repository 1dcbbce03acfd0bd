//! Domain model module declarations.

pub mod action;
pub mod job;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod work_item;
