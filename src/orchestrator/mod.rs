//! Orchestration: polling work sources, spawning sessions locally or on a
//! cluster, supervising detached session processes, and snapshots.

pub mod child_monitor;
pub mod cluster;
pub mod control_loop;
pub mod session_manager;
pub mod snapshot_manager;
pub mod spawner;

pub use control_loop::{Orchestrator, TickReport};
pub use session_manager::SessionManager;
pub use spawner::{LocalSpawner, Spawner};
