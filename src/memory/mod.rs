mod pool;

pub use pool::{Stack, StackPool};
