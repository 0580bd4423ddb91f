pub mod error;
pub mod value;

pub mod events;
pub mod keypath;
pub mod mixin;
pub mod observe;
pub mod predicates;
pub mod proto;
pub mod structural;

pub use error::{Error, Result};
pub use events::{EventChannel, Reply};
pub use observe::{observe, ChangeSet, Observable};
pub use structural::{deep_clone, equivalent, merge};
pub use value::{Function, Value};
