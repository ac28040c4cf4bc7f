//! The loop sequencer: task registration and schedule analysis.

use smallvec::smallvec;
use tracing::debug;

use crate::error::*;
use crate::iteration::Iteration;
use crate::phases::Callbacks;
use crate::requirement::Requirement;
use crate::task::{Alt, Task};

/// Target-specific scheduling limits supplied by the planner.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Upper bound on the computed unroll width.
    pub max_unroll: i64,
    /// Upper bound on any task's positive lookahead.
    pub max_lookahead: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_unroll: 64, max_lookahead: 64 }
    }
}

/// Schedule analysis results, valid once [`LoopSequencer::analyze`] succeeds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Analysis {
    pub unroll: i64,
    pub warmup: i64,
}

/// Interleaves a registry of periodic tasks into one linear, software-
/// pipelined instruction sequence.
///
/// Usage mirrors the three-stage lifetime of the schedule:
///
/// 1. register tasks with [`schedule`](Self::schedule) and friends;
/// 2. [`analyze`](Self::analyze) the registry to derive the unroll width and
///    check satisfiability;
/// 3. [`materialize`](Self::materialize) the full loop structure through the
///    installed callbacks and task actions.
///
/// The sequencer is generic over a caller-owned generation context `C`:
/// every action, guard, and callback receives it explicitly, so there is no
/// ambient mutable state.
pub struct LoopSequencer<C> {
    pub(crate) limits: Limits,
    pub(crate) tasks: Vec<Task<C>>,
    pub(crate) callbacks: Callbacks<C>,
    pub(crate) analysis: Option<Analysis>,
}

impl<C> LoopSequencer<C> {
    pub fn new(limits: Limits) -> Self {
        Self { limits, tasks: Vec::new(), callbacks: Callbacks::default(), analysis: None }
    }

    /// Register a single-path task.
    pub fn schedule(&mut self, req: Requirement, action: impl FnMut(&mut C, Iteration) + 'static) {
        self.tasks.push(Task { alts: smallvec![Alt::new(req, action)] });
    }

    /// Register a single-path task with a participation guard.
    ///
    /// The guard is evaluated once per occurrence the linearizer considers.
    /// If it rejects the first considered occurrence, the task is dropped
    /// for the whole generation.
    pub fn schedule_if(
        &mut self,
        req: Requirement,
        action: impl FnMut(&mut C, Iteration) + 'static,
        guard: impl Fn(&C, Iteration) -> bool + 'static,
    ) {
        self.tasks.push(Task { alts: smallvec![Alt::guarded(req, action, guard)] });
    }

    /// Register ordered path alternatives for one logical purpose.
    ///
    /// Alternative 0 drives the pipelined (warmup/main) regimes; the last
    /// alternative drives the tail regimes. Alternatives keep the strict
    /// declaration order of the registry.
    pub fn schedule_alts(&mut self, alts: Vec<Alt<C>>) {
        assert!(!alts.is_empty(), "a task needs at least one alternative");
        self.tasks.push(Task { alts: alts.into_iter().collect() });
    }

    /// Swap the two most recently registered tasks.
    ///
    /// This is the operand-interleave policy switch (B-before-A instead of
    /// A-before-B), applied as a single pairwise reorder rather than a
    /// per-call heuristic.
    pub fn swap_last_two(&mut self) {
        let n = self.tasks.len();
        assert!(n >= 2, "swap_last_two needs two registered tasks");
        self.tasks.swap(n - 2, n - 1);
    }

    /// Derive the unroll width and verify the registry is satisfiable.
    ///
    /// The unroll width is the least common multiple of all main-path
    /// periods, bounded by [`Limits::max_unroll`]. If the planner supplied
    /// an `expected_unroll`, a disagreement is a contract violation and
    /// fails with [`Error::UnrollMismatch`].
    pub fn analyze(&mut self, expected_unroll: Option<i64>) -> Result<()> {
        snafu::ensure!(!self.tasks.is_empty(), EmptyRegistrySnafu);

        for task in &self.tasks {
            for alt in &task.alts {
                let req = &alt.req;
                snafu::ensure!(req.period > 0, InvalidPeriodSnafu { period: req.period });
                snafu::ensure!(
                    req.duration <= req.period,
                    DurationExceedsPeriodSnafu { duration: req.duration, period: req.period }
                );
                snafu::ensure!((1..=4).contains(&req.variants), InvalidVariantsSnafu { variants: req.variants });
                snafu::ensure!(
                    req.lookahead <= self.limits.max_lookahead,
                    UnsatisfiableLookaheadSnafu { lookahead: req.lookahead, max: self.limits.max_lookahead }
                );
            }
        }

        let mut unroll: i64 = 1;
        for task in &self.tasks {
            unroll = lcm(unroll, task.main_req().period);
            snafu::ensure!(
                unroll <= self.limits.max_unroll,
                UnrollOverflowSnafu { computed: unroll, max: self.limits.max_unroll }
            );
        }

        if let Some(expected) = expected_unroll {
            snafu::ensure!(unroll == expected, UnrollMismatchSnafu { computed: unroll, expected });
        }

        let warmup = self.tasks.iter().map(|t| t.main_req().lookahead.max(0)).max().unwrap_or(0);

        debug!(unroll, warmup, tasks = self.tasks.len(), "schedule analyzed");
        self.analysis = Some(Analysis { unroll, warmup });
        Ok(())
    }

    /// The canonical pattern width in cursor units.
    ///
    /// # Panics
    ///
    /// If [`analyze`](Self::analyze) has not succeeded yet.
    pub fn unroll(&self) -> i64 {
        self.require_analysis().unroll
    }

    /// The warmup span: the largest positive lookahead across all tasks.
    pub fn warmup(&self) -> i64 {
        self.require_analysis().warmup
    }

    /// Cursor units peeled off the runtime counter while the main loop runs,
    /// handled by the tail regimes after the loop exits.
    pub fn cooldown(&self) -> i64 {
        self.require_analysis().unroll
    }

    pub(crate) fn require_analysis(&self) -> Analysis {
        self.analysis.expect("analyze() must succeed before querying the schedule")
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: i64, b: i64) -> i64 {
    a / gcd(a, b) * b
}
