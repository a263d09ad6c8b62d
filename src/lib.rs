//! A two-level user-space scheduler.
//!
//! Harts (worker threads) flow through a tree of [`SchedulerNode`]s: each
//! node hands an arriving hart to the first child that asked for one, else
//! runs its oldest queued [`Context`], else gives the hart back upward.
//! Contexts are fibers with their own stacks. They can yield, and they can
//! wait on a memory word through [`Parker`] without holding on to a hart.

pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod scheduler;
pub mod sync;
pub mod tls;


pub use config::{Config, ParkMode};
pub use context::{Context, ContextHandle, ContextId, Status};
pub use error::{SchedError, SchedResult};
pub use scheduler::{
    HardwareThread, HartAllocator, Runtime, SchedRef, Scheduler, SchedulerId, SchedulerNode,
};
pub use sync::Parker;
