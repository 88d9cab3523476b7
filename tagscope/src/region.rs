use std::{rc::Rc, sync::Arc};

use crate::{
    CatchPolicy, ExecutionContext, Jump, Outcome, RuntimeError, TagId,
    TagState, TagStates, Value,
};

// The language-level constructs, each one protected region with the policy
// its construct needs.
impl ExecutionContext {
    /// Runs `body` claiming every jump except fatal ones.
    pub fn protect<T, F>(&mut self, body: F) -> Result<Outcome<T>, Jump>
    where
        F: FnOnce(&mut Self) -> Result<T, Jump>,
    {
        self.exec_protected(CatchPolicy::All, body)
    }

    /// Runs `cleanup` after `body` however it left, except for fatal
    /// jumps. A jump raised by the cleanup replaces the pending one.
    pub fn ensure<T, B, C>(&mut self, body: B, cleanup: C) -> Result<T, Jump>
    where
        B: FnOnce(&mut Self) -> Result<T, Jump>,
        C: FnOnce(&mut Self) -> Result<(), Jump>,
    {
        match self.exec_protected(CatchPolicy::Transparent, body) {
            Ok(Outcome::Normal(value)) => {
                cleanup(self)?;
                Ok(value)
            }
            // only a fatal jump lands on a transparent frame
            Ok(Outcome::Jumped(caught)) => Err(self.rethrow(caught)),
            Err(jump) if jump.state() == TagState::Fatal => Err(jump),
            Err(jump) => {
                let held = self.hold(jump);
                cleanup(self)?;
                Err(self.release(held))
            }
        }
    }

    /// Runs `body`, handing raised values accepted by `matches` to `handler`.
    /// A `retry` from the handler starts the body over. Once the handler
    /// completes, the errinfo in place before the region is restored.
    pub fn rescue<T, M, B, H>(
        &mut self,
        matches: M,
        mut body: B,
        mut handler: H,
    ) -> Result<T, Jump>
    where
        M: Fn(&Value) -> bool + 'static,
        B: FnMut(&mut Self) -> Result<T, Jump>,
        H: FnMut(&mut Self, Value) -> Result<T, Jump>,
    {
        let matches = Rc::new(matches);
        let saved = self.errinfo().cloned();
        loop {
            let matcher = Rc::clone(&matches);
            let policy = CatchPolicy::custom(move |state, value| {
                state == TagState::Raise && matcher(value)
            });
            let exception = match self.exec_protected(policy, &mut body)? {
                Outcome::Normal(value) => return Ok(value),
                Outcome::Jumped(caught) if caught.state == TagState::Raise => {
                    caught.value
                }
                Outcome::Jumped(caught) => return Err(self.rethrow(caught)),
            };
            log::debug!("{} rescued {exception}", self.id());

            let handled = self.exec_protected(
                CatchPolicy::Kinds(TagStates::RETRY),
                |ec| handler(ec, exception),
            )?;
            match handled {
                Outcome::Normal(value) => {
                    self.restore_errinfo(saved);
                    return Ok(value);
                }
                Outcome::Jumped(caught) if caught.state == TagState::Retry => {
                    log::debug!("{} retrying rescued region", self.id());
                }
                Outcome::Jumped(caught) => return Err(self.rethrow(caught)),
            }
        }
    }

    /// A `while` loop: `break` leaves with its value, `next` starts the next
    /// iteration, `redo` re-runs the body without re-checking `cond`.
    pub fn loop_region<C, B>(&mut self, mut cond: C, mut body: B) -> Result<Value, Jump>
    where
        C: FnMut(&mut Self) -> Result<bool, Jump>,
        B: FnMut(&mut Self) -> Result<Value, Jump>,
    {
        let policy = TagStates::BREAK | TagStates::NEXT | TagStates::REDO;
        while cond(self)? {
            loop {
                match self.exec_protected(CatchPolicy::Kinds(policy), &mut body)? {
                    Outcome::Normal(_) => break,
                    Outcome::Jumped(caught) => match caught.state {
                        TagState::Break => return Ok(caught.value),
                        TagState::Next => break,
                        TagState::Redo => continue,
                        _ => return Err(self.rethrow(caught)),
                    },
                }
            }
        }
        Ok(Value::Nil)
    }

    /// A method body named `name`. `return` leaves it with its value.
    pub fn method_region<B>(&mut self, name: &str, body: B) -> Result<Value, Jump>
    where
        B: FnOnce(&mut Self) -> Result<Value, Jump>,
    {
        self.frames.push(Arc::from(name));
        let result =
            self.exec_protected(CatchPolicy::Kinds(TagStates::RETURN), body);
        self.frames.pop();
        match result? {
            Outcome::Normal(value) => Ok(value),
            Outcome::Jumped(caught) if caught.state == TagState::Return => {
                Ok(caught.value)
            }
            Outcome::Jumped(caught) => Err(self.rethrow(caught)),
        }
    }

    /// A lambda body. `return`, `break` and `next` all leave the lambda with
    /// their value; `redo` and `retry` have nowhere to go and raise.
    pub fn lambda_region<B>(&mut self, body: B) -> Result<Value, Jump>
    where
        B: FnOnce(&mut Self) -> Result<Value, Jump>,
    {
        let policy = TagStates::RETURN
            | TagStates::BREAK
            | TagStates::NEXT
            | TagStates::REDO
            | TagStates::RETRY;
        match self.exec_protected(CatchPolicy::Kinds(policy), body)? {
            Outcome::Normal(value) => Ok(value),
            Outcome::Jumped(caught) => match caught.state {
                TagState::Return | TagState::Break | TagState::Next => {
                    Ok(caught.value)
                }
                state => {
                    let origin =
                        caught.origin.or_else(|| self.frames.last().cloned());
                    Err(self.local_jump_from(state, caught.value, origin))
                }
            },
        }
    }

    /// Raises a local-jump error for a block escape that found no region
    /// able to honour it. Other kinds continue as plain jumps.
    pub fn jump_tag_but_local_jump(&mut self, state: TagState, value: Value) -> Jump {
        let origin = self.frames.last().cloned();
        self.local_jump_from(state, value, origin)
    }

    /// Like [`jump_tag_but_local_jump`](Self::jump_tag_but_local_jump), for a
    /// jump whose originating frame is already known.
    fn local_jump_from(
        &mut self,
        state: TagState,
        value: Value,
        origin: Option<Arc<str>>,
    ) -> Jump {
        match RuntimeError::local_jump(state, origin, value.clone()) {
            Some(error) => {
                log::debug!("{} {error}", self.id());
                self.raise_jump(Value::error(error))
            }
            None => self.deliver(state, None, value),
        }
    }

    /// `catch(label) { ... }`: a `throw` of an equal label leaves with its
    /// value.
    pub fn catch<B>(&mut self, label: Value, body: B) -> Result<Value, Jump>
    where
        B: FnOnce(&mut Self) -> Result<Value, Jump>,
    {
        match self.exec_protected(CatchPolicy::Label(label), body)? {
            Outcome::Normal(value) => Ok(value),
            Outcome::Jumped(caught) if caught.state == TagState::Throw => {
                Ok(caught.value)
            }
            Outcome::Jumped(caught) => Err(self.rethrow(caught)),
        }
    }

    /// Throws `value` to the innermost `catch` of `label`. With no such catch
    /// on the chain an uncaught-throw error is raised from here instead.
    pub fn throw<T>(&mut self, label: Value, value: Value) -> Result<T, Jump> {
        if !self.has_catch(&label) {
            log::debug!("{} no catch for {label}", self.id());
            return self.raise(Value::error(RuntimeError::UncaughtThrow {
                label,
                value,
            }));
        }
        Err(self.deliver(TagState::Throw, Some(label), value))
    }

    /// Runs a whole program. Every jump ends here, as a value or as the
    /// error describing why it escaped.
    pub fn run_toplevel<B>(&mut self, body: B) -> Result<Value, RuntimeError>
    where
        B: FnOnce(&mut Self) -> Result<Value, Jump>,
    {
        debug_assert_eq!(
            self.current_tag(),
            TagId::ROOT,
            "the toplevel region must be outermost"
        );
        self.frames.push(Arc::from("<main>"));
        let result = self.exec_protected(CatchPolicy::All, body);
        self.frames.pop();
        match result {
            Ok(Outcome::Normal(value)) => Ok(value),
            Ok(Outcome::Jumped(caught)) => match caught.state {
                TagState::Return | TagState::ReturnToplevel => Ok(caught.value),
                _ => {
                    let error = self.error_for(caught);
                    log::info!("{} terminated: {error}", self.id());
                    Err(error)
                }
            },
            Err(jump) => Err(self.uncaught(jump)),
        }
    }
}
