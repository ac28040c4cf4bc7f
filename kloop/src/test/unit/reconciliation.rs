//! Barrier-count reconciliation across contexts.

use crate::config::{Features, KLoopConfig};
use crate::reconcile::BarrierBudget;
use crate::stream::{BarrierKind, Instr};
use crate::test::helpers::{generate, run, staged_config};

fn periodic_config(split: bool) -> KLoopConfig {
    KLoopConfig::builder()
        .unroll_k(8)
        .ka_load(4)
        .kb_load(4)
        .a_copies(2)
        .b_copies(2)
        .op_count(4)
        .barrier_freq(4)
        .features(Features { split_barrier: split, ..Default::default() })
        .build()
}

fn embedded_budget(cfg: &KLoopConfig) -> BarrierBudget {
    let kloop = generate(cfg.clone());
    kloop
        .instrs
        .iter()
        .find_map(|i| match i {
            Instr::BarrierDeficit { budget } => Some(budget.clone()),
            _ => None,
        })
        .expect("reconciliation must be emitted")
}

/// The closed-form arrival count must agree with what the generated code
/// actually executes, for every trip count.
#[test]
fn budget_matches_executed_arrivals() {
    for cfg in [periodic_config(false), periodic_config(true), staged_config(1), staged_config(3), staged_config(4)] {
        let budget = embedded_budget(&cfg);
        for trip in 1..5 * cfg.unroll_k {
            // With max_trip == trip the deficit is zero, so the pad loop
            // contributes nothing and the raw count is observable.
            let exec = run(cfg.clone(), trip, trip);
            assert_eq!(
                exec.arrivals(),
                budget.arrivals(trip),
                "closed form diverges from emission at trip {trip} ({cfg:?})"
            );
        }
    }
}

/// Contexts with different trip counts but a shared maximum report the same
/// total participation count after padding.
#[test]
fn differing_trips_reconcile_to_equal_arrivals() {
    for cfg in [periodic_config(false), periodic_config(true), staged_config(3)] {
        let max_trip = 3 * cfg.unroll_k;
        let reference = run(cfg.clone(), max_trip, max_trip).arrivals();
        for trip in [1, 5, cfg.unroll_k, 2 * cfg.unroll_k - 1, 2 * cfg.unroll_k, max_trip - 3, max_trip] {
            let total = run(cfg.clone(), trip, max_trip).arrivals();
            assert_eq!(total, reference, "trip {trip} disagrees with max {max_trip} ({cfg:?})");
        }
    }
}

/// Split barriers stay balanced: every signal is eventually awaited, on
/// both the main and the short path.
#[test]
fn split_barriers_balance_signals_and_waits() {
    let cfg = periodic_config(true);
    for trip in [5, 16, 20, 24] {
        let exec = run(cfg.clone(), trip, 24);
        let signals = exec.executed.iter().filter(|i| matches!(i, Instr::Barrier { kind: BarrierKind::Signal, .. })).count();
        let waits = exec.executed.iter().filter(|i| matches!(i, Instr::Barrier { kind: BarrierKind::Wait, .. })).count();
        assert_eq!(signals, waits, "unbalanced split barriers at trip {trip}");
    }
}

/// Without any barrier sources, no reconciliation is emitted at all.
#[test]
fn barrier_free_configs_skip_reconciliation() {
    let kloop = generate(crate::test::helpers::plain_config());
    assert!(!kloop.instrs.iter().any(|i| matches!(i, Instr::BarrierDeficit { .. })));
    assert!(!kloop.instrs.iter().any(|i| matches!(i, Instr::Barrier { .. })));
}
