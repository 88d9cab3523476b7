use std::{fmt, sync::Arc};

use crate::{EntityId, RuntimeError};

/// Opaque payload carried by a jump: the raised exception, the thrown
/// value, the value a `break` or `return` hands back.
///
/// The object model proper lives outside this crate; `Object` only names an
/// entity in it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Fixnum(i64),
    Symbol(Arc<str>),
    String(Arc<str>),
    Object(EntityId),
    /// an engine error reified as an exception value
    Error(Arc<RuntimeError>),
}

impl Value {
    pub fn symbol(name: impl Into<Arc<str>>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn string(text: impl Into<Arc<str>>) -> Self {
        Self::String(text.into())
    }

    pub fn error(error: RuntimeError) -> Self {
        Self::Error(Arc::new(error))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Self::Fixnum(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&RuntimeError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Fixnum(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Fixnum(value) => write!(f, "{value}"),
            Self::Symbol(name) => write!(f, ":{name}"),
            Self::String(text) => write!(f, "{text:?}"),
            Self::Object(id) => write!(f, "#<object {}>", id.0),
            Self::Error(error) => write!(f, "#<{error}>"),
        }
    }
}

/// Frame names captured when an exception is raised, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Backtrace(Vec<Arc<str>>);

impl Backtrace {
    pub fn new(frames: Vec<Arc<str>>) -> Self {
        Self(frames)
    }

    pub fn frames(&self) -> &[Arc<str>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, frame) in self.0.iter().enumerate() {
            if depth > 0 {
                writeln!(f)?;
            }
            write!(f, "\tfrom {frame}")?;
        }
        Ok(())
    }
}

/// The exception in flight, as recorded by the context when it was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrInfo {
    pub exception: Value,
    pub backtrace: Backtrace,
}
