use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::Value;

/// Why control left a protected region.
///
/// `None` is the resting state of every live frame; the other kinds are
/// written into the target frame by a jump and consumed exactly once.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagState {
    None = 0,
    Return,
    Break,
    Next,
    Retry,
    Redo,
    ReturnToplevel,
    Throw,
    Raise,
    Fatal,
}

impl TagState {
    #[inline]
    pub fn is_jump(self) -> bool {
        self > Self::None && self <= Self::Fatal
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Return => "return",
            Self::Break => "break",
            Self::Next => "next",
            Self::Retry => "retry",
            Self::Redo => "redo",
            Self::ReturnToplevel => "return_toplevel",
            Self::Throw => "throw",
            Self::Raise => "raise",
            Self::Fatal => "fatal",
        }
    }

    /// Message for a loop/block escape that reached a region unable to
    /// honour it.
    pub fn local_jump_message(self) -> Option<&'static str> {
        match self {
            Self::Return | Self::ReturnToplevel => Some("unexpected return"),
            Self::Break => Some("break from proc-closure"),
            Self::Next => Some("unexpected next"),
            Self::Redo => Some("unexpected redo"),
            Self::Retry => Some("retry outside of rescue clause"),
            _ => None,
        }
    }
}

impl fmt::Display for TagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of jump kinds a region claims.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TagStates: u16 {
        const RETURN = 1 << 0;
        const BREAK = 1 << 1;
        const NEXT = 1 << 2;
        const RETRY = 1 << 3;
        const REDO = 1 << 4;
        const RETURN_TOPLEVEL = 1 << 5;
        const THROW = 1 << 6;
        const RAISE = 1 << 7;
    }
}

impl From<TagState> for TagStates {
    fn from(state: TagState) -> Self {
        match state {
            TagState::Return => Self::RETURN,
            TagState::Break => Self::BREAK,
            TagState::Next => Self::NEXT,
            TagState::Retry => Self::RETRY,
            TagState::Redo => Self::REDO,
            TagState::ReturnToplevel => Self::RETURN_TOPLEVEL,
            TagState::Throw => Self::THROW,
            TagState::Raise => Self::RAISE,
            // routed outside handler dispatch
            TagState::None | TagState::Fatal => Self::empty(),
        }
    }
}

/// Index of a tag frame in its context's tag stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u32);

impl TagId {
    /// The sentinel frame at the base of every context.
    pub const ROOT: Self = Self(0);

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub type CatchPredicate = dyn Fn(TagState, &Value) -> bool;

/// Which jumps a protected region is willing to take. Anything it does not
/// claim unwinds through it to an enclosing region.
pub enum CatchPolicy {
    /// claims nothing; the region only observes unwinding
    Transparent,
    /// claims every kind except `Fatal`
    All,
    Kinds(TagStates),
    /// claims `Throw` jumps whose label equals this one
    Label(Value),
    Custom(Box<CatchPredicate>),
}

impl CatchPolicy {
    pub fn custom(
        predicate: impl Fn(TagState, &Value) -> bool + 'static,
    ) -> Self {
        Self::Custom(Box::new(predicate))
    }

    pub fn claims(
        &self,
        state: TagState,
        label: Option<&Value>,
        value: &Value,
    ) -> bool {
        match self {
            Self::Transparent => false,
            Self::All => state.is_jump() && state != TagState::Fatal,
            Self::Kinds(kinds) => {
                let kind = TagStates::from(state);
                !kind.is_empty() && kinds.contains(kind)
            }
            Self::Label(own) => state == TagState::Throw && label == Some(own),
            Self::Custom(predicate) => {
                state != TagState::Fatal && predicate(state, value)
            }
        }
    }
}

impl fmt::Debug for CatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transparent => f.write_str("Transparent"),
            Self::All => f.write_str("All"),
            Self::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            Self::Label(label) => f.debug_tuple("Label").field(label).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One non-local jump target.
#[derive(Debug)]
pub struct TagFrame {
    /// `None` only for the sentinel root
    pub(crate) previous: Option<TagId>,
    pub(crate) state: TagState,
    pub(crate) recorded_lock_recursion: u32,
    pub(crate) policy: CatchPolicy,
}

impl TagFrame {
    pub(crate) fn root() -> Self {
        Self {
            previous: None,
            state: TagState::None,
            recorded_lock_recursion: 0,
            policy: CatchPolicy::All,
        }
    }

    #[inline]
    pub fn previous(&self) -> Option<TagId> {
        self.previous
    }

    #[inline]
    pub fn state(&self) -> TagState {
        self.state
    }

    #[inline]
    pub fn recorded_lock_recursion(&self) -> u32 {
        self.recorded_lock_recursion
    }

    #[inline]
    pub fn policy(&self) -> &CatchPolicy {
        &self.policy
    }
}

/// A jump in flight. Only the context creates one; it travels outward as
/// the `Err` side of every body until the target region consumes it.
#[must_use = "a jump must be propagated to its target region"]
#[derive(Debug)]
pub struct Jump {
    pub(crate) target: TagId,
    pub(crate) state: TagState,
    pub(crate) label: Option<Value>,
    pub(crate) value: Value,
    pub(crate) origin: Option<Arc<str>>,
}

impl Jump {
    #[inline]
    pub fn target(&self) -> TagId {
        self.target
    }

    #[inline]
    pub fn state(&self) -> TagState {
        self.state
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn label(&self) -> Option<&Value> {
        self.label.as_ref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub(crate) fn into_caught(self) -> Caught {
        Caught {
            state: self.state,
            value: self.value,
            label: self.label,
            origin: self.origin,
        }
    }
}

/// A jump after its target region consumed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caught {
    pub state: TagState,
    pub value: Value,
    pub label: Option<Value>,
    pub origin: Option<Arc<str>>,
}

/// What `exec_protected` hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Normal(T),
    Jumped(Caught),
}

impl<T> Outcome<T> {
    /// `TagState::None` for a normal completion, the consumed kind otherwise.
    pub fn state(&self) -> TagState {
        match self {
            Self::Normal(_) => TagState::None,
            Self::Jumped(caught) => caught.state,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal(_))
    }

    pub fn normal(self) -> Option<T> {
        match self {
            Self::Normal(value) => Some(value),
            Self::Jumped(_) => None,
        }
    }
}
