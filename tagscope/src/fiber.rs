use std::sync::Arc;

use crate::{ExecutionContext, Jump, RuntimeError, Value, VmProxy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    Created,
    Running,
    Finished,
    Failed,
}

/// A coroutine with its own context. Jumps raised inside it never reach
/// the context that started it.
#[derive(Debug)]
pub struct Fiber {
    ec: ExecutionContext,
    state: FiberState,
    name: Arc<str>,
}

impl Fiber {
    pub fn new(vm: &VmProxy, name: &str) -> Self {
        Self {
            ec: vm.new_context(name),
            state: FiberState::Created,
            name: Arc::from(name),
        }
    }

    pub fn state(&self) -> FiberState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ec
    }

    /// Runs `body` in a fresh outermost region of the fiber's own context.
    /// An uncaught jump fails this fiber only.
    pub fn start<F>(&mut self, body: F) -> Result<Value, RuntimeError>
    where
        F: FnOnce(&mut ExecutionContext) -> Result<Value, Jump>,
    {
        if self.state != FiberState::Created {
            return Err(RuntimeError::FiberStarted(self.name.clone()));
        }
        self.state = FiberState::Running;
        let result = self.ec.run_toplevel(body);
        self.state = match &result {
            Ok(_) => FiberState::Finished,
            Err(error) => {
                log::debug!("fiber {} failed: {error}", self.name);
                FiberState::Failed
            }
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TagState, Vm, VmCreateInfo};

    #[test]
    fn uncaught_raise_fails_only_the_fiber() {
        let vm = Vm::new(VmCreateInfo::default());
        let proxy = vm.new_proxy();
        let mut caller = proxy.new_context("caller");

        let outcome = caller
            .protect(|_| {
                let mut fiber = Fiber::new(&proxy, "worker");
                let result = fiber.start(|ec| ec.raise(Value::string("inside")));
                assert!(matches!(
                    result,
                    Err(RuntimeError::UncaughtException { .. })
                ));
                assert_eq!(fiber.state(), FiberState::Failed);
                assert_eq!(fiber.context().depth(), 0);
                Ok(Value::from(1))
            })
            .expect("caller sees no jump");
        assert_eq!(outcome.normal(), Some(Value::from(1)));
    }

    #[test]
    fn finished_fiber_cannot_restart() {
        let vm = Vm::new(VmCreateInfo::default());
        let mut fiber = Fiber::new(&vm.new_proxy(), "once");
        let value = fiber
            .start(|ec| ec.jump(TagState::ReturnToplevel, Value::from(5)))
            .expect("toplevel return");
        assert_eq!(value, Value::from(5));
        assert_eq!(fiber.state(), FiberState::Finished);
        assert_eq!(
            fiber.start(|_| Ok(Value::Nil)),
            Err(RuntimeError::FiberStarted(Arc::from("once")))
        );
    }
}
