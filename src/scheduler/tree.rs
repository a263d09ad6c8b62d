use crate::config::{Config, MIN_STACK_SIZE};
use crate::context::Context;
use crate::error::*;
use crate::memory::{Stack, StackPool};
use crate::sync::Parker;
use crate::tls::TlsHooks;
use spin::Mutex;
use std::sync::Arc;

/// State shared by every node of one scheduler tree.
pub struct Tree {
    config: Config,
    parker: Parker,
    stacks: StackPool,
    tls: Arc<dyn TlsHooks>,
    stack_size: Mutex<StackSize>,
}

struct StackSize {
    bytes: usize,
    /// Set by the first context creation.
    frozen: bool,
}

impl Tree {
    pub fn new(config: Config, tls: Arc<dyn TlsHooks>) -> SchedResult<Arc<Tree>> {
        config.validate()?;
        Ok(Arc::new(Tree {
            parker: Parker::new(&config, tls.clone()),
            stacks: StackPool::new(),
            tls,
            stack_size: Mutex::new(StackSize {
                bytes: config.stack_size,
                frozen: false,
            }),
            config,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn parker(&self) -> &Parker {
        &self.parker
    }

    pub fn stacks(&self) -> &StackPool {
        &self.stacks
    }

    pub fn tls(&self) -> &Arc<dyn TlsHooks> {
        &self.tls
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size.lock().bytes
    }

    /// Changes the stack size of contexts created from now on.
    ///
    /// Only allowed before the first context of the tree is created.
    pub fn set_stack_size(&self, bytes: usize) -> SchedResult<()> {
        if bytes < MIN_STACK_SIZE {
            return Err(SchedError::InvalidConfig("stack_size is below 64 KiB"));
        }
        let mut size = self.stack_size.lock();
        if size.frozen {
            return Err(SchedError::StackSizeFrozen);
        }
        size.bytes = bytes;
        Ok(())
    }

    pub(crate) fn allocate_stack(&self) -> (usize, Stack) {
        let bytes = {
            let mut size = self.stack_size.lock();
            size.frozen = true;
            size.bytes
        };
        (bytes, self.stacks.allocate(bytes))
    }

    pub(crate) fn release(&self, context: Box<Context>) {
        let size = context.stack_size();
        self.stacks.free(size, context.into_stack());
    }
}
