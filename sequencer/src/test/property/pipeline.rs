//! Property suites for the pipelined schedule: coverage counts, producer
//! ordering, and determinism.

use proptest::prelude::*;

use crate::phases::Phase;
use crate::requirement::Requirement;
use crate::sequencer::{Limits, LoopSequencer};
use crate::test::helpers::{Event, Trace, record, run};

fn arb_period() -> impl Strategy<Value = i64> {
    prop_oneof![Just(1), Just(2), Just(4), Just(8)]
}

fn build(period: i64, phase: i64, lookahead: i64) -> LoopSequencer<Trace> {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule(Requirement::every(period).phase(phase).lookahead(lookahead), record("task"));
    seq.schedule(Requirement::every(1), record("consumer"));
    seq
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Within one canonical pattern, a task fires unroll/period times,
    /// each on its own trigger grid.
    #[test]
    fn coverage_matches_period((period, phase, lookahead) in arb_period().prop_flat_map(|p| {
        (Just(p), 0..p, 0..=8i64)
    })) {
        let trace = run(build(period, phase, lookahead), Some(8));
        let fires: Vec<i64> = trace
            .phase_events(Phase::MainLoop)
            .iter()
            .filter_map(|e| match e {
                Event::Fire { task: "task", h } => Some(*h),
                _ => None,
            })
            .collect();

        prop_assert_eq!(fires.len() as i64, 8 / period);
        for h in fires {
            prop_assert_eq!((h - phase).rem_euclid(period), 0);
        }
    }

    /// A producer's occurrence covering step h is always emitted before
    /// the consumer of step h, whatever the lookahead.
    #[test]
    fn producer_precedes_consumer((period, lookahead) in arb_period().prop_flat_map(|p| {
        (Just(p), 0..=8i64)
    })) {
        let trace = run(build(period, 0, lookahead), Some(8));
        let end = trace.position(|e| matches!(e, Event::LoopEnd(_)));

        for (i, event) in trace.events[..end].iter().enumerate() {
            let Event::Fire { task: "consumer", h } = event else { continue };
            let group = h - h.rem_euclid(period);
            let produced = trace.events[..i]
                .iter()
                .any(|e| matches!(e, Event::Fire { task: "task", h } if *h == group));
            prop_assert!(produced, "consumer step {} has no earlier producer for group {}", h, group);
        }
    }

    /// Identical registries linearize to byte-identical traces.
    #[test]
    fn linearization_is_deterministic((period, phase, lookahead) in arb_period().prop_flat_map(|p| {
        (Just(p), 0..p, 0..=8i64)
    })) {
        let first = run(build(period, phase, lookahead), Some(8));
        let second = run(build(period, phase, lookahead), Some(8));
        prop_assert_eq!(first.events, second.events);
    }
}
