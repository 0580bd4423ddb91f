//! Structural operations over [`Value`](crate::value::Value) graphs.
//!
//! # Modules
//!
//! - [`clone`]: [`deep_clone`] with cycle handling and descriptor preservation.
//! - [`equivalent`]: deep structural [`equivalent`] predicate.
//! - [`merge`]: deep [`merge`] and configured [`Merger`]s.

pub mod clone;
pub mod equivalent;
pub mod merge;

pub use clone::{deep_clone, deep_clone_with, CloneHook, CloneOptions};
pub use equivalent::equivalent;
pub use merge::{config, merge, MergeOptions, Merger};
