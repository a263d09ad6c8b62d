mod context;
mod task;

pub use context::{Context, ContextHandle, ContextId, Status};
pub(crate) use context::{StartRoutine, Switch};
pub use task::{block, current, in_context, yield_now, BlockFn};
