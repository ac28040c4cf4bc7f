//! Software-pipelining loop sequencer.
//!
//! Consumes a registry of periodic tasks, (requirement, action) pairs with
//! period, phase, duration, variant count, and lookahead, and produces one
//! linear instruction sequence that interleaves them correctly across the
//! warmup, steady-state, remainder, and short-loop regimes of an unrolled
//! reduction loop.
//!
//! # Module Organization
//!
//! - [`iteration`] - The generation-time cursor type
//! - [`requirement`] - Periodicity requirements and their combinators
//! - [`task`] - Scheduled tasks, guards, and path alternatives
//! - [`sequencer`] - Registration and schedule analysis
//! - [`phases`] - Phase-structured emission and loop-control callbacks
//!
//! The sequencer itself is target-agnostic: actions and callbacks are
//! closures over a caller-owned generation context, and the produced
//! artifact is whatever those closures emit.

pub mod error;
pub mod iteration;
pub mod phases;
pub mod requirement;
pub mod sequencer;
pub mod task;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use iteration::Iteration;
pub use phases::{LABEL_BOTTOM, LABEL_SHORT, LABEL_SHORT_END, LabelId, Phase};
pub use requirement::Requirement;
pub use sequencer::{Limits, LoopSequencer};
pub use task::Alt;
