//! Observe: deep change tracking for objects and arrays.
//!
//! # Overview
//!
//! [`observe`] wraps a container in an [`Observable`]. Writes made through
//! the wrapper emit a `"change"` event carrying a [`ChangeSet`]; nested
//! containers are wrapped too, and their changes re-emit on every ancestor
//! with a dotted path (`"a.2.b"`).
//!
//! Writes made directly on the raw container are invisible until
//! [`Observable::reobserve`] re-scans it.
//!
//! # Modules
//!
//! - [`change`]: [`ChangeSet`] and [`Change`].
//! - [`observable`]: [`observe`], [`reobserve`] and [`Observable`].

pub mod change;
pub mod observable;

pub use change::{Change, ChangeSet};
pub use observable::{observe, reobserve, Observable, CHANGE_EVENT};
