use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    Backtrace, CatchPolicy, Caught, ContextId, ErrInfo, Jump,
    LockReleaseHook, Outcome, RuntimeError, TagFrame, TagId, TagState, Value,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RaisedFlags: u8 {
        const EXCEPTION = 1 << 0;
        const STACK_OVERFLOW = 1 << 1;
        const NO_MEMORY = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct ContextCreateInfo {
    pub name: String,
    /// tag frames a context may hold before pushes fail with a stack overflow
    pub max_tag_depth: usize,
    /// frames kept in a captured backtrace
    pub backtrace_limit: usize,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            max_tag_depth: 10_000,
            backtrace_limit: 64,
        }
    }
}

/// Per-thread-of-control state: the tag stack with its sentinel root, the
/// reentrant lock counter and the exception in flight.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    name: Arc<str>,
    tags: Vec<TagFrame>,
    current_tag: TagId,
    lock_recursion_count: u32,
    raised: RaisedFlags,
    errinfo: Option<ErrInfo>,
    /// names of the active method frames, outermost first
    pub(crate) frames: Vec<Arc<str>>,
    lock_hook: Option<Arc<dyn LockReleaseHook>>,
    max_tag_depth: usize,
    backtrace_limit: usize,
}

/// A jump whose transfer is paused while cleanup code runs.
#[derive(Debug)]
pub(crate) struct HeldJump(Jump);

impl ExecutionContext {
    pub fn new(info: ContextCreateInfo) -> Self {
        let mut tags = Vec::with_capacity(32);
        tags.push(TagFrame::root());
        Self {
            id: ContextId(0),
            name: Arc::from(info.name),
            tags,
            current_tag: TagId::ROOT,
            lock_recursion_count: 0,
            raised: RaisedFlags::empty(),
            errinfo: None,
            frames: Vec::new(),
            lock_hook: None,
            max_tag_depth: info.max_tag_depth,
            backtrace_limit: info.backtrace_limit,
        }
    }

    pub fn with_id(mut self, id: ContextId) -> Self {
        self.id = id;
        self
    }

    pub fn with_lock_hook(mut self, hook: Arc<dyn LockReleaseHook>) -> Self {
        self.lock_hook = Some(hook);
        self
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn current_tag(&self) -> TagId {
        self.current_tag
    }

    /// Tag frames held above the sentinel root.
    #[inline]
    pub fn depth(&self) -> usize {
        self.tags.len() - 1
    }

    pub fn tag(&self, tag: TagId) -> Option<&TagFrame> {
        self.tags.get(tag.index())
    }

    /// Tags from the current head outward, ending with the root.
    pub fn tag_chain(&self) -> impl Iterator<Item = TagId> + '_ {
        std::iter::successors(Some(self.current_tag), |&tag| {
            self.tags[tag.index()].previous
        })
    }

    #[inline]
    pub fn lock_recursion_count(&self) -> u32 {
        self.lock_recursion_count
    }

    pub fn set_lock_recursion_count(&mut self, count: u32) {
        self.lock_recursion_count = count;
    }

    pub fn errinfo(&self) -> Option<&ErrInfo> {
        self.errinfo.as_ref()
    }

    pub fn take_errinfo(&mut self) -> Option<ErrInfo> {
        self.errinfo.take()
    }

    /// Puts back the exception that was in flight before a rescue region
    /// handled its own.
    pub fn restore_errinfo(&mut self, info: Option<ErrInfo>) {
        self.errinfo = info;
    }

    pub fn backtrace(&self) -> Backtrace {
        Backtrace::new(
            self.frames
                .iter()
                .rev()
                .take(self.backtrace_limit)
                .cloned()
                .collect(),
        )
    }

    // raised flags

    pub fn raised_set(&mut self, flags: RaisedFlags) {
        self.raised.insert(flags);
    }

    pub fn raised_reset(&mut self, flags: RaisedFlags) {
        self.raised.remove(flags);
    }

    pub fn raised_p(&self, flags: RaisedFlags) -> bool {
        self.raised.intersects(flags)
    }

    pub fn raised_clear(&mut self) {
        self.raised = RaisedFlags::empty();
    }

    /// Marks an exception as being handled. Returns `true` when one already
    /// was, i.e. the caller is raising recursively.
    pub fn set_raised(&mut self) -> bool {
        if self.raised_p(RaisedFlags::EXCEPTION) {
            return true;
        }
        self.raised_set(RaisedFlags::EXCEPTION);
        false
    }

    /// Clears the exception mark. Returns whether it was set.
    pub fn reset_raised(&mut self) -> bool {
        if !self.raised_p(RaisedFlags::EXCEPTION) {
            return false;
        }
        self.raised_reset(RaisedFlags::EXCEPTION);
        true
    }

    /// `true` when another tag frame would exceed the configured depth.
    pub fn stack_check(&self) -> bool {
        self.depth() >= self.max_tag_depth
    }

    // tag stack

    /// Pushes a frame claiming the jumps `policy` selects. Fails only when
    /// the context is out of tag depth, in which case a stack-overflow
    /// exception is already on its way to an enclosing region.
    pub fn push_tag(&mut self, policy: CatchPolicy) -> Result<TagId, Jump> {
        if self.stack_check() {
            return Err(self.stack_overflow());
        }
        let previous = self.current_tag;
        let tag = TagId::from_index(self.tags.len());
        self.tags.push(TagFrame {
            previous: Some(previous),
            state: TagState::None,
            recorded_lock_recursion: self.lock_recursion_count,
            policy,
        });
        self.current_tag = tag;
        log::trace!(
            "{} push tag {} over {}",
            self.id,
            tag.index(),
            previous.index()
        );
        Ok(tag)
    }

    /// Pops `tag` and everything pushed above it.
    pub fn pop_tag(&mut self, tag: TagId) {
        debug_assert_ne!(tag, TagId::ROOT, "the root tag is never popped");
        let Some(frame) = self.tags.get(tag.index()) else {
            log::error!("{} pop of unknown tag {}", self.id, tag.index());
            return;
        };
        if tag == TagId::ROOT {
            return;
        }
        let previous = frame.previous.unwrap_or(TagId::ROOT);
        if self.tags.len() > tag.index() + 1 {
            log::debug!(
                "{} dropping {} frame(s) left above tag {}",
                self.id,
                self.tags.len() - tag.index() - 1,
                tag.index()
            );
        }
        self.tags.truncate(tag.index());
        self.current_tag = previous;
        log::trace!("{} pop tag {}", self.id, tag.index());
    }

    /// Makes the frame enclosing `tag` current while `tag` stays allocated,
    /// so jumps issued meanwhile skip it.
    pub fn tmp_pop_tag(&mut self, tag: TagId) {
        self.current_tag = self.tags[tag.index()].previous.unwrap_or(TagId::ROOT);
    }

    pub fn repush_tag(&mut self, tag: TagId) {
        debug_assert!(tag.index() < self.tags.len(), "repush of a popped tag");
        self.current_tag = tag;
    }

    /// Runs `body` inside a fresh tag frame.
    ///
    /// Returns `Outcome::Normal` when the body completes, `Outcome::Jumped`
    /// when a jump targeting this frame arrives (its state consumed and the
    /// frame popped), and `Err` for jumps bound further out, after popping
    /// this frame and everything above it.
    pub fn exec_protected<T, F>(
        &mut self,
        policy: CatchPolicy,
        body: F,
    ) -> Result<Outcome<T>, Jump>
    where
        F: FnOnce(&mut Self) -> Result<T, Jump>,
    {
        let tag = self.push_tag(policy)?;
        match body(self) {
            Ok(value) => {
                self.pop_tag(tag);
                Ok(Outcome::Normal(value))
            }
            Err(jump) if jump.target == tag => {
                let state = self.tag_state(tag);
                debug_assert_eq!(state, jump.state);
                self.pop_tag(tag);
                if state == TagState::Raise {
                    self.raised_reset(
                        RaisedFlags::STACK_OVERFLOW | RaisedFlags::NO_MEMORY,
                    );
                }
                log::debug!(
                    "{} tag {} consumed {state}",
                    self.id,
                    tag.index()
                );
                Ok(Outcome::Jumped(jump.into_caught()))
            }
            Err(jump) => {
                debug_assert_eq!(
                    self.tags.get(tag.index()).map(TagFrame::state),
                    Some(TagState::None),
                    "unwound frame must not carry a state"
                );
                self.pop_tag(tag);
                Err(jump)
            }
        }
    }

    /// Reads and clears the state of `tag`, then reconciles the lock
    /// counter with what the frame recorded at push time.
    fn tag_state(&mut self, tag: TagId) -> TagState {
        let frame = &mut self.tags[tag.index()];
        let state = std::mem::replace(&mut frame.state, TagState::None);
        let recorded = frame.recorded_lock_recursion;
        self.lock_rec_check(recorded);
        debug_assert!(state.is_jump(), "consumed a tag without a jump");
        state
    }

    fn lock_rec_check(&mut self, recorded: u32) {
        let current = self.lock_recursion_count;
        if current == recorded {
            return;
        }
        match &self.lock_hook {
            Some(hook) => hook.release_excess(self.id, recorded, current),
            None => log::warn!(
                "{} lock recursion {current} differs from recorded {recorded} and no release hook is installed",
                self.id
            ),
        }
        if recorded < current {
            self.lock_recursion_count = recorded;
        } else {
            log::error!(
                "{} lock recursion fell below its recorded level ({current} < {recorded})",
                self.id
            );
        }
    }

    /// Starts a jump of kind `state` carrying `value` toward the nearest
    /// region that claims it. Always `Err`; propagate it with `?`.
    pub fn jump<T>(&mut self, state: TagState, value: Value) -> Result<T, Jump> {
        Err(self.deliver(state, None, value))
    }

    pub(crate) fn deliver(
        &mut self,
        state: TagState,
        label: Option<Value>,
        value: Value,
    ) -> Jump {
        let state = if state.is_jump() {
            state
        } else {
            log::error!("{} invalid tag jump: {state}", self.id);
            TagState::Fatal
        };
        let target = self.resolve_target(state, label.as_ref(), &value);
        let frame = &mut self.tags[target.index()];
        debug_assert!(
            target == TagId::ROOT || frame.state == TagState::None,
            "tag {} already carries a pending jump",
            target.index()
        );
        frame.state = state;
        log::trace!("{} jump {state} to tag {}", self.id, target.index());
        Jump {
            target,
            state,
            label,
            value,
            origin: self.frames.last().cloned(),
        }
    }

    fn resolve_target(
        &self,
        state: TagState,
        label: Option<&Value>,
        value: &Value,
    ) -> TagId {
        if state == TagState::Fatal {
            return self.outermost_tag();
        }
        self.tag_chain()
            .find(|&tag| {
                tag == TagId::ROOT
                    || self.tags[tag.index()].policy.claims(state, label, value)
            })
            .unwrap_or(TagId::ROOT)
    }

    /// The frame directly above the root on the current chain, or the root
    /// when nothing is pushed.
    fn outermost_tag(&self) -> TagId {
        self.tag_chain()
            .take_while(|&tag| tag != TagId::ROOT)
            .last()
            .unwrap_or(TagId::ROOT)
    }

    /// Sends a consumed jump on toward the next region that claims it.
    pub(crate) fn rethrow(&mut self, caught: Caught) -> Jump {
        self.deliver(caught.state, caught.label, caught.value)
    }

    /// Whether a region on the current chain would claim a throw of `label`.
    pub(crate) fn has_catch(&self, label: &Value) -> bool {
        self.tag_chain().any(|tag| {
            tag != TagId::ROOT
                && matches!(&self.tags[tag.index()].policy, CatchPolicy::Label(own) if own == label)
        })
    }

    pub(crate) fn hold(&mut self, jump: Jump) -> HeldJump {
        if let Some(frame) = self.tags.get_mut(jump.target.index()) {
            frame.state = TagState::None;
        }
        HeldJump(jump)
    }

    pub(crate) fn release(&mut self, held: HeldJump) -> Jump {
        let HeldJump(jump) = held;
        debug_assert!(
            jump.target.index() < self.tags.len(),
            "held jump outlived its target"
        );
        if let Some(frame) = self.tags.get_mut(jump.target.index()) {
            frame.state = jump.state;
        }
        jump
    }

    // exceptions

    /// Raises `exception`, recording it with a backtrace as the context's
    /// errinfo.
    pub fn raise<T>(&mut self, exception: Value) -> Result<T, Jump> {
        Err(self.raise_jump(exception))
    }

    pub(crate) fn raise_jump(&mut self, exception: Value) -> Jump {
        let backtrace = self.backtrace();
        self.errinfo = Some(ErrInfo {
            exception: exception.clone(),
            backtrace,
        });
        self.deliver(TagState::Raise, None, exception)
    }

    fn stack_overflow(&mut self) -> Jump {
        let message = Value::string("stack level too deep");
        if self.raised_p(RaisedFlags::STACK_OVERFLOW) {
            log::error!("{} stack overflow while unwinding a stack overflow", self.id);
            return self.deliver(TagState::Fatal, None, message);
        }
        self.raised_set(RaisedFlags::STACK_OVERFLOW);
        log::debug!("{} stack overflow at depth {}", self.id, self.depth());
        self.raise_jump(message)
    }

    /// Reports an allocation failure from the memory manager. A second one
    /// before the first was rescued is fatal.
    pub fn no_memory<T>(&mut self) -> Result<T, Jump> {
        let message = Value::string("failed to allocate memory");
        if self.raised_p(RaisedFlags::NO_MEMORY) {
            log::error!("{} out of memory while unwinding an out-of-memory", self.id);
            return Err(self.deliver(TagState::Fatal, None, message));
        }
        self.raised_set(RaisedFlags::NO_MEMORY);
        self.raise(message)
    }

    /// Consumes a jump that reached the sentinel root and turns it into the
    /// error reported to the embedding engine.
    pub fn uncaught(&mut self, jump: Jump) -> RuntimeError {
        if jump.target == TagId::ROOT {
            self.tag_state(TagId::ROOT);
        } else {
            log::error!(
                "{} jump to live tag {} reported as uncaught",
                self.id,
                jump.target.index()
            );
            if let Some(frame) = self.tags.get_mut(jump.target.index()) {
                frame.state = TagState::None;
            }
        }
        self.error_for(jump.into_caught())
    }

    pub(crate) fn error_for(&mut self, caught: Caught) -> RuntimeError {
        match caught.state {
            TagState::Raise => {
                let trace = match self.errinfo.take() {
                    Some(info) if info.exception == caught.value => {
                        info.backtrace
                    }
                    _ => Backtrace::default(),
                };
                RuntimeError::UncaughtException {
                    exception: caught.value,
                    trace,
                }
            }
            TagState::Throw => RuntimeError::UncaughtThrow {
                label: caught.label.unwrap_or_default(),
                value: caught.value,
            },
            TagState::None | TagState::Fatal => RuntimeError::Fatal(caught.value),
            state => match RuntimeError::local_jump(
                state,
                caught.origin,
                caught.value.clone(),
            ) {
                Some(error) => error,
                None => RuntimeError::Fatal(caught.value),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;
    use crate::TagStates;

    fn context() -> ExecutionContext {
        ExecutionContext::new(ContextCreateInfo::default())
    }

    #[derive(Debug, Default)]
    struct CountingHook {
        calls: AtomicUsize,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl LockReleaseHook for CountingHook {
        fn release_excess(&self, _: ContextId, recorded: u32, current: u32) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push((recorded, current));
        }
    }

    #[test]
    fn pops_restore_head_after_matching_pushes() {
        let mut ec = context();
        for count in 0..32 {
            let before = ec.current_tag();
            let tags: Vec<TagId> = (0..count)
                .map(|_| ec.push_tag(CatchPolicy::Transparent).expect("push"))
                .collect();
            assert_eq!(ec.depth(), count);
            for tag in tags.into_iter().rev() {
                ec.pop_tag(tag);
            }
            assert_eq!(ec.current_tag(), before);
            assert_eq!(ec.depth(), 0);
        }
    }

    #[test]
    fn normal_completion_reports_none() {
        let mut ec = context();
        let outcome = ec
            .exec_protected(CatchPolicy::All, |_| Ok(5))
            .expect("no jump");
        assert_eq!(outcome.state(), TagState::None);
        assert_eq!(outcome.normal(), Some(5));
        assert_eq!(ec.current_tag(), TagId::ROOT);
    }

    #[test]
    fn jump_returns_its_kind_exactly_once_and_pops_inner_frames() {
        let mut ec = context();
        let mut inner_pushed = 0;
        let outcome = ec
            .exec_protected(CatchPolicy::Kinds(TagStates::BREAK), |ec| {
                for _ in 0..4 {
                    ec.push_tag(CatchPolicy::Transparent)?;
                    inner_pushed += 1;
                }
                ec.jump::<()>(TagState::Break, Value::from(9))
            })
            .expect("break is claimed");
        assert_eq!(inner_pushed, 4);
        assert_eq!(outcome.state(), TagState::Break);
        assert_eq!(ec.depth(), 0);
        assert_eq!(ec.current_tag(), TagId::ROOT);
        assert_eq!(ec.tag(TagId::ROOT).map(TagFrame::state), Some(TagState::None));
    }

    #[test]
    fn raise_in_innermost_region_targets_outer_claimer() {
        let mut ec = context();
        let r1_previous = ec.current_tag();
        let mut observed = Vec::new();

        let r1 = ec
            .exec_protected(CatchPolicy::Kinds(TagStates::RAISE), |ec| {
                let r2 = ec.exec_protected(
                    CatchPolicy::Kinds(TagStates::BREAK),
                    |ec| {
                        let r3 = ec.exec_protected(
                            CatchPolicy::Kinds(TagStates::NEXT),
                            |ec| ec.raise::<()>(Value::string("boom")),
                        );
                        observed.push(("r3", ec.current_tag(), r3.is_err()));
                        r3.map(|_| ())
                    },
                );
                observed.push(("r2", ec.current_tag(), r2.is_err()));
                r2.map(|_| ())
            })
            .expect("r1 claims raise");

        assert_eq!(r1.state(), TagState::Raise);
        assert_eq!(ec.current_tag(), r1_previous);
        // r3 and r2 saw the jump pass through them, never a state of their own
        assert_eq!(observed.len(), 2);
        assert!(observed.iter().all(|(_, _, passed)| *passed));
        assert_eq!(ec.depth(), 0);
    }

    #[test]
    fn lock_mismatch_triggers_release_once_per_consumed_frame() {
        let hook = Arc::new(CountingHook::default());
        let mut ec = context().with_lock_hook(hook.clone());

        let outer = ec
            .exec_protected(CatchPolicy::All, |ec| {
                ec.set_lock_recursion_count(1);
                let inner = ec.exec_protected(
                    CatchPolicy::Kinds(TagStates::RAISE),
                    |ec| {
                        ec.set_lock_recursion_count(3);
                        ec.raise::<()>(Value::Nil)
                    },
                )?;
                assert_eq!(inner.state(), TagState::Raise);
                assert_eq!(ec.lock_recursion_count(), 1);
                Ok(())
            })
            .expect("completes");

        assert!(outer.is_normal());
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*hook.seen.lock(), vec![(1, 3)]);
    }

    #[test]
    fn matching_lock_level_skips_the_hook() {
        let hook = Arc::new(CountingHook::default());
        let mut ec = context().with_lock_hook(hook.clone());
        ec.set_lock_recursion_count(2);
        let outcome = ec
            .exec_protected(CatchPolicy::All, |ec| ec.raise::<()>(Value::Nil))
            .expect("claimed");
        assert_eq!(outcome.state(), TagState::Raise);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unclaimed_jump_reaches_root_and_becomes_uncaught() {
        let mut ec = context();
        let jump = ec
            .exec_protected(CatchPolicy::Transparent, |ec| {
                ec.jump::<()>(TagState::Break, Value::from(1))
            })
            .expect_err("nothing claims break");
        assert_eq!(jump.target(), TagId::ROOT);
        let error = ec.uncaught(jump);
        assert!(matches!(
            error,
            RuntimeError::LocalJump { reason: TagState::Break, .. }
        ));
        assert_eq!(ec.tag(TagId::ROOT).map(TagFrame::state), Some(TagState::None));
    }

    #[test]
    fn uncaught_raise_keeps_value_and_backtrace() {
        let mut ec = context();
        ec.frames.push("<main>".into());
        ec.frames.push("fetch".into());
        let jump = ec
            .raise::<()>(Value::string("gone"))
            .expect_err("raise always jumps");
        match ec.uncaught(jump) {
            RuntimeError::UncaughtException { exception, trace } => {
                assert_eq!(exception, Value::string("gone"));
                assert_eq!(trace.frames()[0].as_ref(), "fetch");
                assert_eq!(trace.frames().len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn tmp_popped_region_is_skipped_by_new_jumps() {
        let mut ec = context();
        let outcome = ec
            .exec_protected(CatchPolicy::Kinds(TagStates::RAISE), |ec| {
                let inner = ec.exec_protected(CatchPolicy::All, |ec| {
                    let own = ec.current_tag();
                    ec.tmp_pop_tag(own);
                    let jump = ec.raise::<()>(Value::Nil);
                    ec.repush_tag(own);
                    jump
                });
                assert!(inner.is_err(), "inner region was temporarily popped");
                inner.map(|_| ())
            })
            .expect("outer claims");
        assert_eq!(outcome.state(), TagState::Raise);
    }

    #[test]
    fn fatal_goes_to_outermost_frame_past_claimers() {
        let mut ec = context();
        let outer = ec
            .exec_protected(CatchPolicy::Transparent, |ec| {
                let inner = ec.exec_protected(CatchPolicy::All, |ec| {
                    ec.jump::<()>(TagState::Fatal, Value::string("dead"))
                });
                assert!(inner.is_err(), "fatal bypasses handler dispatch");
                inner.map(|_| ())
            })
            .expect("outermost frame takes fatal");
        assert_eq!(outer.state(), TagState::Fatal);
    }

    #[test]
    fn jump_without_a_kind_escalates_to_fatal() {
        let mut ec = context();
        let outer = ec
            .exec_protected(CatchPolicy::Transparent, |ec| {
                let inner = ec.exec_protected(CatchPolicy::All, |ec| {
                    ec.jump::<()>(TagState::None, Value::Nil)
                });
                let jump = inner.expect_err("escalated jump skips handlers");
                assert_eq!(jump.state(), TagState::Fatal);
                Err::<(), _>(jump)
            })
            .expect("outermost frame takes the escalated jump");
        assert_eq!(outer.state(), TagState::Fatal);
        assert_eq!(ec.depth(), 0);
    }

    #[test]
    fn push_beyond_depth_raises_stack_overflow() {
        let mut ec = ExecutionContext::new(ContextCreateInfo {
            max_tag_depth: 3,
            ..ContextCreateInfo::default()
        });
        let outcome = ec
            .exec_protected(CatchPolicy::Kinds(TagStates::RAISE), |ec| {
                ec.push_tag(CatchPolicy::Transparent)?;
                ec.push_tag(CatchPolicy::Transparent)?;
                ec.push_tag(CatchPolicy::Transparent)?;
                Ok(())
            })
            .expect("overflow raised and rescued");
        match outcome {
            Outcome::Jumped(caught) => {
                assert_eq!(caught.value, Value::string("stack level too deep"));
            }
            Outcome::Normal(()) => panic!("overflow was not raised"),
        }
        assert!(!ec.raised_p(RaisedFlags::STACK_OVERFLOW));
        assert_eq!(ec.depth(), 0);
    }

    #[test]
    fn second_memory_failure_before_rescue_is_fatal() {
        let mut ec = context();
        let first = ec.no_memory::<()>().expect_err("raises");
        assert_eq!(first.state(), TagState::Raise);
        let held = ec.hold(first);
        let second = ec.no_memory::<()>().expect_err("escalates");
        assert_eq!(second.state(), TagState::Fatal);
        drop(held);
    }

    #[test]
    fn set_raised_detects_recursion() {
        let mut ec = context();
        assert!(!ec.set_raised());
        assert!(ec.set_raised());
        assert!(ec.reset_raised());
        assert!(!ec.reset_raised());
        ec.raised_set(RaisedFlags::NO_MEMORY);
        ec.raised_clear();
        assert!(!ec.raised_p(RaisedFlags::all()));
    }
}
