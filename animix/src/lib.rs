//! Track-based skeletal animation mixing runtime.
//!
//! This crate owns the per-frame orchestration of skeletal animation: which
//! timelines run, at what time, with what blend weight, and in what order
//! side effects are delivered. It is renderer- and loader-agnostic; hosts
//! bring their own world transforms, file formats and drawing.
//!
//! The per-frame pair is [`AnimationState::update`] followed by
//! [`AnimationState::apply`]. `apply` has no side effects on scheduling
//! state, so one state can pose several [`Skeleton`] instances identically.

#![forbid(unsafe_code)]

mod error;
mod model;
mod runtime;

pub use error::*;
pub use model::*;
pub use runtime::*;
