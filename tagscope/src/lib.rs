mod context;
mod entity;
mod error;
mod fiber;
mod lock;
mod refinement;
mod region;
mod scope;
mod tag;
mod threads;
mod value;
mod vm;

pub use context::{ContextCreateInfo, ExecutionContext, RaisedFlags};
pub use entity::*;
pub use error::*;
pub use fiber::*;
pub use lock::*;
pub use refinement::*;
pub use scope::*;
pub use tag::*;
pub use threads::*;
pub use value::*;
pub use vm::*;
