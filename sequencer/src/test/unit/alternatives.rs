//! Path alternatives, guards, and tail selection.

use crate::phases::Phase;
use crate::requirement::Requirement;
use crate::sequencer::{Limits, LoopSequencer};
use crate::task::Alt;
use crate::test::helpers::{Event, Trace, record, run};

#[test]
fn tail_regimes_use_the_remainder_alternative() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule_alts(vec![
        Alt::new(Requirement::every(4).duration(4), record("main")),
        Alt::new(Requirement::every(2), record("rem")),
    ]);

    let trace = run(seq, Some(8));

    let body_fires: Vec<_> = trace
        .phase_events(Phase::MainLoop)
        .iter()
        .filter(|e| matches!(e, Event::Fire { .. }))
        .cloned()
        .collect();
    assert_eq!(body_fires, vec![Event::Fire { task: "main", h: 0 }, Event::Fire { task: "main", h: 4 }]);

    let tail_fires: Vec<i64> = trace
        .phase_events(Phase::Remainder)
        .iter()
        .filter_map(|e| match e {
            Event::Fire { task: "rem", h } => Some(*h),
            _ => None,
        })
        .collect();
    assert_eq!(tail_fires, vec![0, 2, 4, 6]);
    assert!(!trace.phase_events(Phase::Remainder).iter().any(|e| matches!(e, Event::Fire { task: "main", .. })));
}

#[test]
fn guard_rejecting_first_occurrence_drops_the_task() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    // First considered occurrence is the canonical-body trigger at h = 0;
    // rejecting it suppresses the task everywhere, including h = 4.
    seq.schedule_if(Requirement::every(4), record("guarded"), |_: &Trace, it| it.get() != 0);

    let trace = run(seq, Some(8));
    assert!(trace.fires("guarded").is_empty());
}

#[test]
fn guard_rejecting_later_occurrence_only_skips_it() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule_if(Requirement::every(4), record("guarded"), |_: &Trace, it| it.get() != 4);

    let trace = run(seq, Some(8));
    let fires = trace.fires("guarded");
    assert!(!fires.is_empty());
    assert!(fires.iter().all(|&h| h != 4));
    assert!(fires.contains(&0));
}

#[test]
fn unconditional_tail_occurrences_precede_the_trip_guard() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule_alts(vec![
        Alt::new(Requirement::every(8), |_, _| {}),
        Alt::new(Requirement::every(8).unconditional(), record("activate")),
    ]);

    let trace = run(seq, Some(8));
    let tail = trace.phase_events(Phase::Remainder);

    let fire = tail.iter().position(|e| matches!(e, Event::Fire { task: "activate", .. })).unwrap();
    let guard = tail.iter().position(|e| matches!(e, Event::JumpIfLt { threshold: 1, .. })).unwrap();
    assert!(fire < guard, "activation must run even when the counter is exhausted at this step");
}

#[test]
fn check_optional_tasks_are_dropped_from_tails() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule(Requirement::every(4).check_optional(), record("stall"));
    seq.schedule(Requirement::every(4), record("load"));

    let trace = run(seq, Some(8));
    assert!(trace.phase_events(Phase::MainLoop).iter().any(|e| matches!(e, Event::Fire { task: "stall", .. })));
    for phase in [Phase::Remainder, Phase::ShortLoop] {
        assert!(!trace.phase_events(phase).iter().any(|e| matches!(e, Event::Fire { task: "stall", .. })));
        assert!(trace.phase_events(phase).iter().any(|e| matches!(e, Event::Fire { task: "load", .. })));
    }
}

#[test]
fn swap_last_two_reorders_paired_tasks() {
    let mut seq = LoopSequencer::new(Limits::default());
    seq.schedule(Requirement::every(8).check_optional(), |_, _| {});
    seq.schedule(Requirement::every(4), record("a"));
    seq.schedule(Requirement::every(4), record("b"));
    seq.swap_last_two();

    let trace = run(seq, Some(8));
    let body = trace.phase_events(Phase::MainLoop);
    let a = body.iter().position(|e| *e == Event::Fire { task: "a", h: 0 }).unwrap();
    let b = body.iter().position(|e| *e == Event::Fire { task: "b", h: 0 }).unwrap();
    assert!(b < a, "swapped pair must emit B before A");
}
