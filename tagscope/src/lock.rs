use std::fmt;

use parking_lot::{Condvar, Mutex};

use crate::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Invoked when a consumed jump finds the context holding more reentrant
/// lock levels than its target frame recorded.
pub trait LockReleaseHook: Send + Sync + fmt::Debug {
    /// Leave the lock until only `recorded` levels remain.
    fn release_excess(&self, context: ContextId, recorded: u32, current: u32);
}

#[derive(Debug)]
struct LockState {
    owner: Option<ContextId>,
    depth: u32,
}

/// VM-wide reentrant lock. Re-entering from the owning context only bumps
/// the depth, which mirrors the owner's `lock_recursion_count`.
#[derive(Debug)]
pub struct VmLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl VmLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn enter(&self, ec: &mut ExecutionContext) {
        let id = ec.id();
        let mut state = self.state.lock();
        if state.owner == Some(id) {
            state.depth += 1;
        } else {
            while state.owner.is_some() {
                self.released.wait(&mut state);
            }
            state.owner = Some(id);
            state.depth = 1;
        }
        ec.set_lock_recursion_count(state.depth);
        log::trace!("{id} entered vm lock at depth {}", state.depth);
    }

    pub fn leave(&self, ec: &mut ExecutionContext) {
        let id = ec.id();
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(id), "{id} left a lock it does not own");
        if state.owner != Some(id) {
            log::error!("{id} left the vm lock owned by {:?}", state.owner);
            return;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        ec.set_lock_recursion_count(state.depth);
    }

    pub fn owner(&self) -> Option<ContextId> {
        self.state.lock().owner
    }

    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }
}

impl Default for VmLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LockReleaseHook for VmLock {
    fn release_excess(&self, context: ContextId, recorded: u32, current: u32) {
        let mut state = self.state.lock();
        if state.owner != Some(context) || recorded > current {
            log::error!(
                "unexpected lock recursion for {context}: recorded {recorded}, current {current}, owner {:?}",
                state.owner
            );
            return;
        }
        log::warn!(
            "{context} releasing {} excess vm lock level(s)",
            current - recorded
        );
        while state.depth > recorded {
            state.depth -= 1;
        }
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;
    use crate::{ContextCreateInfo, Value};

    #[test]
    fn reentering_bumps_the_context_counter() {
        let lock = VmLock::new();
        let mut ec = ExecutionContext::new(ContextCreateInfo::default());
        lock.enter(&mut ec);
        lock.enter(&mut ec);
        assert_eq!(ec.lock_recursion_count(), 2);
        assert_eq!(lock.depth(), 2);
        lock.leave(&mut ec);
        lock.leave(&mut ec);
        assert_eq!(ec.lock_recursion_count(), 0);
        assert_eq!(lock.owner(), None);
    }

    #[test]
    fn raise_with_lock_held_releases_it_for_other_threads() {
        let lock = Arc::new(VmLock::new());
        let mut ec = ExecutionContext::new(ContextCreateInfo::default())
            .with_lock_hook(lock.clone());

        let held = lock.clone();
        let outcome = ec
            .protect(|ec| {
                held.enter(ec);
                held.enter(ec);
                ec.raise::<()>(Value::string("interrupted"))
            })
            .expect("protect claims raise");
        assert_eq!(outcome.state(), crate::TagState::Raise);
        assert_eq!(ec.lock_recursion_count(), 0);
        assert_eq!(lock.owner(), None);

        let other = lock.clone();
        let waiter = thread::spawn(move || {
            let mut ec = ExecutionContext::new(ContextCreateInfo::default())
                .with_id(ContextId(7));
            other.enter(&mut ec);
            let owner = other.owner();
            other.leave(&mut ec);
            owner
        });
        thread::sleep(Duration::from_millis(5));
        assert_eq!(waiter.join().expect("waiter"), Some(ContextId(7)));
    }
}
