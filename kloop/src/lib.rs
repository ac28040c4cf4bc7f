//! k-loop generation for blocked GEMM kernels.
//!
//! Builds the inner ("k") loop of a blocked matrix-multiplication kernel as
//! one linear, software-pipelined instruction sequence: operand loads,
//! address increments, on-chip staging traffic, repacking/dequantization,
//! remainder remasking, synchronization barriers, and the outer products
//! themselves, interleaved by the `kweave-sequencer` engine and wrapped in
//! warmup, steady-state, remainder, and short-loop regimes.
//!
//! # Module Organization
//!
//! - [`config`] - The planner-facing configuration record and feature set
//! - [`stream`] - The abstract instruction stream the generator emits
//! - [`state`] - Active-set state and remainder activation
//! - [`buffering`] - Staging-ring synchronization choreography
//! - [`kloop`] - The generator wiring everything into the sequencer
//! - [`reconcile`] - Trailing barrier-count reconciliation
//!
//! The crate is a code-generation library: everything here runs once, at
//! generation time, and all failures are configuration faults. The produced
//! stream has no error surface.

pub mod buffering;
pub mod config;
pub mod error;
pub mod kloop;
pub mod reconcile;
pub mod state;
pub mod stream;

#[cfg(test)]
pub mod test;

pub use buffering::StagingController;
pub use config::{Features, KLoopConfig};
pub use error::{ConfigError, Result};
pub use kloop::{KLoop, KLoopGenerator};
pub use reconcile::{ArrivalSource, BarrierBudget};
pub use state::{GenState, MaskSet, RemainderBounds, Side};
pub use stream::{BarrierKind, Emitter, Instr, Label, Operand};
