//! Events: named listeners per scope.
//!
//! # Modules
//!
//! - [`channel`]: [`EventChannel`], [`Reply`] and the [`Dispatch`] future.
//! - [`scope`]: identity-keyed side table and the free [`on`] / [`off`] /
//!   [`trigger`] functions over any object, array or function scope.

pub mod channel;
pub mod scope;

pub use channel::{listener, Dispatch, EventChannel, Listener, ListenerId, Reply, Unsubscribe};
pub use scope::{channel_for, off, on, trigger};
