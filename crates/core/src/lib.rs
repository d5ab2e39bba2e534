//! Tranche Core
//!
//! Shared types for the deposit registry, tree builder and claims engine,
//! plus the append-only deposit log that connects them.

pub mod log;
pub mod types;

pub use log::{DepositLog, DepositSource, JsonlDepositLog, LogError, LogReader, MemoryDepositLog};
pub use types::*;
