use super::SchedRef;
use crate::context::Context;
use core::fmt;

/// What a hart does next after arriving at a scheduler.
pub enum HartAction {
    /// Hand the hart to a child that asked for one.
    Grant(SchedRef),

    /// Run a context of this scheduler.
    Run(Box<Context>),

    /// Nothing to do here; give the hart back upward.
    Yield,
}

impl fmt::Debug for HartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HartAction::Grant(child) => write!(f, "Grant({:?})", child.id()),
            HartAction::Run(context) => write!(f, "Run({:?})", context.id()),
            HartAction::Yield => write!(f, "Yield"),
        }
    }
}
