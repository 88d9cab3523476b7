use std::{
    io,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    ContextCreateInfo, ContextId, ContextThread, EntityTable, ExecutionContext,
    Jump, ScopeArena, Value, VmLock,
};

#[derive(Debug)]
pub struct VmShared {
    pub scopes: RwLock<ScopeArena>,
    pub entities: RwLock<EntityTable>,
    pub lock: Arc<VmLock>,
    context_info: ContextCreateInfo,
    next_context: AtomicU64,
}

/// Owner of the VM. Stays on the thread that created it; other threads get
/// a [`VmProxy`].
pub struct Vm {
    inner: Arc<VmShared>,
    _marker: PhantomData<*const ()>,
}

#[derive(Debug, Clone)]
pub struct VmProxy {
    pub shared: Arc<VmShared>,
}

#[derive(Debug, Clone, Default)]
pub struct VmCreateInfo {
    /// template for every context the VM creates
    pub context: ContextCreateInfo,
}

impl Vm {
    pub fn new(info: VmCreateInfo) -> Self {
        let entities = EntityTable::new();
        let scopes = ScopeArena::new(EntityTable::OBJECT);

        let inner = VmShared {
            scopes: RwLock::new(scopes),
            entities: RwLock::new(entities),
            lock: Arc::new(VmLock::new()),
            context_info: info.context,
            next_context: AtomicU64::new(1),
        };

        Self {
            inner: Arc::new(inner),
            _marker: PhantomData,
        }
    }

    pub fn new_proxy(&self) -> VmProxy {
        VmProxy {
            shared: self.inner.clone(),
        }
    }

    pub fn spawn_thread<F>(&self, name: &str, body: F) -> io::Result<ContextThread>
    where
        F: FnOnce(&mut ExecutionContext, &VmProxy) -> Result<Value, Jump>,
        F: Send + 'static,
    {
        self.new_proxy().spawn_thread(name, body)
    }
}

impl VmProxy {
    pub fn create_proxy(&self) -> Self {
        self.clone()
    }

    /// A fresh context with its own tag stack, wired to the VM lock.
    pub fn new_context(&self, name: &str) -> ExecutionContext {
        let id = ContextId(self.shared.next_context.fetch_add(1, Ordering::Relaxed));
        let info = ContextCreateInfo {
            name: name.to_string(),
            ..self.shared.context_info.clone()
        };
        log::debug!("created {id} ({name})");
        ExecutionContext::new(info)
            .with_id(id)
            .with_lock_hook(self.shared.lock.clone())
    }

    pub fn lock(&self) -> &VmLock {
        &self.shared.lock
    }

    pub fn scopes(&self) -> RwLockReadGuard<'_, ScopeArena> {
        self.shared.scopes.read()
    }

    pub fn scopes_mut(&self) -> RwLockWriteGuard<'_, ScopeArena> {
        self.shared.scopes.write()
    }

    pub fn entities(&self) -> RwLockReadGuard<'_, EntityTable> {
        self.shared.entities.read()
    }

    pub fn entities_mut(&self) -> RwLockWriteGuard<'_, EntityTable> {
        self.shared.entities.write()
    }

    /// Runs `body` as the toplevel of a new context on a named native
    /// thread.
    pub fn spawn_thread<F>(&self, name: &str, body: F) -> io::Result<ContextThread>
    where
        F: FnOnce(&mut ExecutionContext, &VmProxy) -> Result<Value, Jump>,
        F: Send + 'static,
    {
        let vm = self.create_proxy();
        let name_owned = name.to_string();
        ContextThread::spawn(name, move || {
            // contexts hold non-Send catch predicates, so each is built on
            // the thread that runs it
            let mut ec = vm.new_context(&name_owned);
            let result = ec.run_toplevel(|ec| body(ec, &vm));
            if let Err(error) = &result {
                log::warn!("{} ({}) ended with {error}", ec.id(), ec.name());
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RuntimeError, TagState};

    #[test]
    fn contexts_get_distinct_ids() {
        let vm = Vm::new(VmCreateInfo::default());
        let proxy = vm.new_proxy();
        let first = proxy.new_context("a");
        let second = proxy.create_proxy().new_context("b");
        assert_ne!(first.id(), second.id());
        assert_eq!(second.name(), "b");
    }

    #[test]
    fn threads_unwind_independently_and_release_the_lock() {
        let vm = Vm::new(VmCreateInfo::default());
        let threads: Vec<ContextThread> = (0..4i64)
            .map(|n| {
                vm.spawn_thread(&format!("worker-{n}"), move |ec, vm| {
                    vm.lock().enter(ec);
                    vm.lock().enter(ec);
                    if n % 2 == 0 {
                        return ec.raise(Value::from(n));
                    }
                    let outcome = ec.protect(|ec| ec.jump::<()>(TagState::Break, Value::Nil))?;
                    vm.lock().leave(ec);
                    vm.lock().leave(ec);
                    Ok(Value::from(outcome.state() == TagState::Break))
                })
                .expect("spawn")
            })
            .collect();

        for (n, thread) in threads.into_iter().enumerate() {
            let result = thread.join();
            if n % 2 == 0 {
                assert!(matches!(
                    result,
                    Err(RuntimeError::UncaughtException { .. })
                ));
            } else {
                assert_eq!(result, Ok(Value::Bool(true)));
            }
        }
        assert_eq!(vm.new_proxy().lock().owner(), None);
    }

    #[test]
    fn shared_scope_arena_is_visible_to_threads() {
        let vm = Vm::new(VmCreateInfo::default());
        let proxy = vm.new_proxy();
        let widget = proxy.entities_mut().define_class("Widget");

        let thread = vm
            .spawn_thread("definer", move |_, vm| {
                let mut scopes = vm.scopes_mut();
                let top = scopes.top();
                let scope = scopes.push(top, widget, false);
                Ok(Value::from(scope.index() as i64))
            })
            .expect("spawn");
        let index = thread.join().expect("no jump").as_fixnum().expect("fixnum");

        let scopes = proxy.scopes();
        assert_eq!(scopes.entity(scopes.top()), EntityTable::OBJECT);
        assert_eq!(scopes.len(), 2);
        assert_eq!(index, 1);
    }
}
