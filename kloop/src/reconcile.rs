//! Trailing barrier-count reconciliation.
//!
//! Cooperating execution contexts share hardware barriers but may carry
//! different trip counts: one lane can take the short path while a sibling
//! runs the full main loop. Every context must arrive at the shared barrier
//! the same total number of times, so after its own loop each context pads
//! with no-op participations up to the statically known maximum.
//!
//! [`BarrierBudget`] is the closed form of "how many arrivals does a trip
//! count of k produce", mirroring the generator's emission exactly; the pad
//! loop makes up the difference between the local count and the count of
//! the largest trip in the group.

use smallvec::SmallVec;

use crate::stream::{BarrierKind, Emitter, Instr};

/// One family of arriving barrier occurrences in the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalSource {
    pub period: i64,
    pub phase: i64,
    pub lookahead: i64,
    /// Fires only inside the steady-state loop (periodic barriers), as
    /// opposed to firing in warmup and tail regimes too.
    pub main_only: bool,
}

/// Closed-form arrival counting for one generated k loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierBudget {
    pub unroll: i64,
    /// One-shot arrivals on main-path entry (split-barrier priming).
    pub entry_arrivals: i64,
    pub sources: SmallVec<[ArrivalSource; 2]>,
}

fn triggers_in(lo: i64, hi: i64, period: i64, phase: i64) -> i64 {
    if hi <= lo {
        return 0;
    }
    let first = lo + (phase - lo).rem_euclid(period);
    if first >= hi { 0 } else { (hi - 1 - first) / period + 1 }
}

impl BarrierBudget {
    /// Total barrier arrivals a context with trip count `k` performs.
    ///
    /// Main path (k >= 2*unroll): warmup primes every arriving occurrence
    /// with trigger below its lookahead, the loop runs `ceil(k/unroll) - 1`
    /// full passes over the peeled counter, and the tail executes its first
    /// `k - passes*unroll` guarded steps. Short path: only the guarded tail
    /// steps run.
    pub fn arrivals(&self, k: i64) -> i64 {
        if k <= 0 {
            return 0;
        }
        let u = self.unroll;
        if k >= 2 * u {
            let passes = (k + u - 1).div_euclid(u) - 1;
            let tail = k - passes * u;
            let mut total = self.entry_arrivals;
            for s in &self.sources {
                total += passes * (u / s.period);
                if !s.main_only {
                    // Warmup primes triggers below the lookahead; primes the
                    // trip count does not cover are individually guarded.
                    total += triggers_in(0, s.lookahead.max(0).min(k), s.period, s.phase);
                    total += triggers_in(0, tail, s.period, s.phase);
                }
            }
            total
        } else {
            let steps = k.min(2 * u - 1);
            self.sources
                .iter()
                .filter(|s| !s.main_only)
                .map(|s| triggers_in(0, steps, s.period, s.phase))
                .sum()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry_arrivals == 0 && self.sources.is_empty()
    }
}

/// Emit the deficit computation and the pad loop.
pub fn emit_reconciliation(e: &mut Emitter, budget: BarrierBudget) {
    if budget.is_empty() {
        return;
    }
    let pad = e.new_label();
    let done = e.new_label();
    e.push(Instr::BarrierDeficit { budget });
    e.place(pad);
    e.push(Instr::JumpIfDeficitZero { target: done });
    e.push(Instr::Barrier { kind: BarrierKind::Normal, fence: false });
    e.push(Instr::DeficitDecrement);
    e.push(Instr::Jump { target: pad });
    e.place(done);
}
