//! Phase-structured emission: warmup, main loop, tails, and the loop-control
//! callback surface.

use tracing::debug;

use crate::iteration::Iteration;
use crate::sequencer::LoopSequencer;
use crate::task::Task;

/// Loop regimes the generated code passes through.
///
/// Warmup and the tails bound a steady-state main loop; the short path is an
/// independent, simplified structure taken when the runtime trip count can
/// never reach one full main pass. Which regime *executes* is a runtime
/// counter comparison; which regimes *exist* is decided here, once, at
/// generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    MainLoop,
    MainPathEnd,
    Cooldown,
    Remainder,
    ShortLoop,
    ShortLoopEnd,
}

/// Sequencer-allocated jump-target identifier.
///
/// The caller maps these to its own label representation lazily, growing its
/// table as new identifiers appear.
pub type LabelId = usize;

/// Label reserved for the short-path entry.
pub const LABEL_SHORT: LabelId = 0;
/// Label reserved for the common exit below all regimes.
pub const LABEL_BOTTOM: LabelId = 1;
/// Label reserved for the short-path epilogue.
pub const LABEL_SHORT_END: LabelId = 2;
const LABEL_DYNAMIC_BASE: LabelId = 3;

/// Loop-control hooks installed by the caller before materialization.
///
/// The phase controller owns the schedule and drives these hooks; nothing
/// here calls back into the registry, keeping the dependency one-directional.
pub struct Callbacks<C> {
    pub(crate) offset_counter: Option<Box<dyn FnMut(&mut C, i64)>>,
    pub(crate) loop_start: Option<Box<dyn FnMut(&mut C, i64)>>,
    pub(crate) loop_end: Option<Box<dyn FnMut(&mut C, i64)>>,
    pub(crate) jump_if_lt: Option<Box<dyn FnMut(&mut C, i64, LabelId)>>,
    pub(crate) jump_target: Option<Box<dyn FnMut(&mut C, LabelId)>>,
    pub(crate) jump: Option<Box<dyn FnMut(&mut C, LabelId)>>,
    pub(crate) notify_phase: Option<Box<dyn FnMut(&mut C, Phase)>>,
}

impl<C> Default for Callbacks<C> {
    fn default() -> Self {
        Self {
            offset_counter: None,
            loop_start: None,
            loop_end: None,
            jump_if_lt: None,
            jump_target: None,
            jump: None,
            notify_phase: None,
        }
    }
}

impl<C> Callbacks<C> {
    fn offset_counter(&mut self, ctx: &mut C, delta: i64) {
        if delta != 0
            && let Some(cb) = &mut self.offset_counter
        {
            cb(ctx, delta);
        }
    }

    fn loop_start(&mut self, ctx: &mut C, unroll: i64) {
        if let Some(cb) = &mut self.loop_start {
            cb(ctx, unroll);
        }
    }

    fn loop_end(&mut self, ctx: &mut C, unroll: i64) {
        if let Some(cb) = &mut self.loop_end {
            cb(ctx, unroll);
        }
    }

    fn jump_if_lt(&mut self, ctx: &mut C, threshold: i64, label: LabelId) {
        if let Some(cb) = &mut self.jump_if_lt {
            cb(ctx, threshold, label);
        }
    }

    fn jump_target(&mut self, ctx: &mut C, label: LabelId) {
        if let Some(cb) = &mut self.jump_target {
            cb(ctx, label);
        }
    }

    fn jump(&mut self, ctx: &mut C, label: LabelId) {
        if let Some(cb) = &mut self.jump {
            cb(ctx, label);
        }
    }

    fn notify_phase(&mut self, ctx: &mut C, phase: Phase) {
        debug!(?phase, "entering phase");
        if let Some(cb) = &mut self.notify_phase {
            cb(ctx, phase);
        }
    }
}

impl<C> LoopSequencer<C> {
    /// Install the counter-adjust hook (`K += delta`).
    pub fn on_offset_counter(&mut self, cb: impl FnMut(&mut C, i64) + 'static) {
        self.callbacks.offset_counter = Some(Box::new(cb));
    }

    /// Install the loop-head hook, called with the unroll width. The hook
    /// owns the loop-top label.
    pub fn on_loop_start(&mut self, cb: impl FnMut(&mut C, i64) + 'static) {
        self.callbacks.loop_start = Some(Box::new(cb));
    }

    /// Install the loop-back hook, called with the unroll width.
    pub fn on_loop_end(&mut self, cb: impl FnMut(&mut C, i64) + 'static) {
        self.callbacks.loop_end = Some(Box::new(cb));
    }

    /// Install the guarded-branch hook: jump to `label` when the runtime
    /// counter is below `threshold`.
    pub fn on_jump_if_lt(&mut self, cb: impl FnMut(&mut C, i64, LabelId) + 'static) {
        self.callbacks.jump_if_lt = Some(Box::new(cb));
    }

    /// Install the label-placement hook.
    pub fn on_jump_target(&mut self, cb: impl FnMut(&mut C, LabelId) + 'static) {
        self.callbacks.jump_target = Some(Box::new(cb));
    }

    /// Install the unconditional-jump hook.
    pub fn on_jump(&mut self, cb: impl FnMut(&mut C, LabelId) + 'static) {
        self.callbacks.jump = Some(Box::new(cb));
    }

    /// Install the phase-transition hook.
    pub fn on_notify_phase(&mut self, cb: impl FnMut(&mut C, Phase) + 'static) {
        self.callbacks.notify_phase = Some(Box::new(cb));
    }

    /// Emit the complete loop structure through the installed callbacks.
    ///
    /// Layout: a trip-count branch to the short path, the warmup primes, the
    /// steady-state main loop over one peeled counter, the main-path tail,
    /// then the short path, converging on the common bottom label. Only the
    /// emitted counter comparisons are runtime decisions.
    ///
    /// # Panics
    ///
    /// If [`analyze`](Self::analyze) has not succeeded yet.
    pub fn materialize(&mut self, ctx: &mut C) {
        let analysis = self.require_analysis();
        let unroll = analysis.unroll;
        let warmup = analysis.warmup;
        // Below this trip count the main loop cannot complete a single full
        // pass plus its peeled tail; the short path takes over.
        let threshold = 2 * unroll;

        let Self { tasks, callbacks: cbs, .. } = self;
        let mut next_label = LABEL_DYNAMIC_BASE;

        cbs.jump_if_lt(ctx, threshold, LABEL_SHORT);

        // Warmup: prime every occurrence whose lookahead reaches back before
        // the first pattern pass, in emitted-position order. Occurrences
        // priming steps the guaranteed minimum trip count does not cover get
        // individual trip guards.
        cbs.notify_phase(ctx, Phase::Warmup);
        for pos in -warmup..0 {
            for task in tasks.iter_mut() {
                let req = task.main_req();
                if req.lookahead <= 0 || req.check_optional {
                    continue;
                }
                let h = pos + req.lookahead;
                if h < 0 || !req.triggers_at(h) {
                    continue;
                }
                if h >= threshold && !req.unconditional {
                    let skip = next_label;
                    next_label += 1;
                    cbs.jump_if_lt(ctx, h + 1, skip);
                    task.fire_main(ctx, Iteration::primed(h));
                    cbs.jump_target(ctx, skip);
                } else {
                    task.fire_main(ctx, Iteration::primed(h));
                }
            }
        }

        // Steady state: one canonical pattern, repeated under a counter
        // peeled by one unroll so the loop always exits with a sub-pattern
        // tail left over.
        cbs.offset_counter(ctx, -unroll);
        cbs.loop_start(ctx, unroll);
        cbs.notify_phase(ctx, Phase::MainLoop);
        for slot in 0..unroll {
            for task in tasks.iter_mut() {
                let req = task.main_req();
                let h = slot + req.lookahead;
                if req.triggers_at(h) {
                    task.fire_main(ctx, Iteration::steady(h));
                }
            }
        }
        cbs.loop_end(ctx, unroll);

        cbs.notify_phase(ctx, Phase::MainPathEnd);
        cbs.offset_counter(ctx, unroll);
        cbs.notify_phase(ctx, Phase::Cooldown);
        cbs.notify_phase(ctx, Phase::Remainder);
        emit_tail(tasks, cbs, ctx, unroll, LABEL_BOTTOM);
        cbs.jump(ctx, LABEL_BOTTOM);

        // Short path: the whole reduction fits below one full main pass.
        // The phase hook restores the pre-scheduling state snapshot before
        // any task runs.
        cbs.jump_target(ctx, LABEL_SHORT);
        cbs.notify_phase(ctx, Phase::ShortLoop);
        emit_tail(tasks, cbs, ctx, threshold - 1, LABEL_SHORT_END);
        cbs.jump_target(ctx, LABEL_SHORT_END);
        cbs.notify_phase(ctx, Phase::ShortLoopEnd);

        cbs.jump_target(ctx, LABEL_BOTTOM);
    }
}

/// Emit a tail regime: per-step trip guards followed by the remainder-path
/// occurrences for that step, in logical cursor order with no pipelining
/// across steps. Within one step, producers with larger lookahead still
/// lead their consumers; the sort is stable, so declaration order breaks
/// ties.
fn emit_tail<C>(tasks: &mut [Task<C>], cbs: &mut Callbacks<C>, ctx: &mut C, len: i64, exit: LabelId) {
    for h in 0..len {
        let mut unconditional = Vec::new();
        let mut guarded = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            let req = task.tail_req();
            if req.check_optional || !req.triggers_at(h) {
                continue;
            }
            if req.unconditional { unconditional.push(i) } else { guarded.push(i) }
        }
        unconditional.sort_by_key(|&i| -tasks[i].tail_req().lookahead);
        guarded.sort_by_key(|&i| -tasks[i].tail_req().lookahead);

        // Unconditional occurrences (remainder activation hooks) run ahead
        // of the step's trip guard so they execute even when the counter
        // runs out exactly here.
        for &i in &unconditional {
            tasks[i].fire_tail(ctx, Iteration::bounded(h, len - h, h));
        }
        cbs.jump_if_lt(ctx, h + 1, exit);
        for &i in &guarded {
            tasks[i].fire_tail(ctx, Iteration::bounded(h, len - h, h));
        }
    }
}
