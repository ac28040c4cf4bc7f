//! Test utilities: a recording generation context and callback wiring.

use crate::iteration::Iteration;
use crate::phases::{LabelId, Phase};
use crate::sequencer::LoopSequencer;

/// Everything the sequencer emitted, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Fire { task: &'static str, h: i64 },
    JumpIfLt { threshold: i64, label: LabelId },
    JumpTarget(LabelId),
    Jump(LabelId),
    OffsetCounter(i64),
    LoopStart(i64),
    LoopEnd(i64),
    Entered(Phase),
}

/// Generation context that records the emission instead of producing code.
#[derive(Debug, Default)]
pub struct Trace {
    pub events: Vec<Event>,
}

impl Trace {
    /// Index of the first event matching `pred`, panicking when absent.
    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().position(pred).expect("expected event not found in trace")
    }

    /// All `Fire` events for the named task.
    pub fn fires(&self, task: &str) -> Vec<i64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Fire { task: t, h } if *t == task => Some(*h),
                _ => None,
            })
            .collect()
    }

    /// Events between entering `phase` and the next phase transition.
    pub fn phase_events(&self, phase: Phase) -> &[Event] {
        let start = self.position(|e| *e == Event::Entered(phase)) + 1;
        let len = self.events[start..]
            .iter()
            .position(|e| matches!(e, Event::Entered(_)))
            .unwrap_or(self.events.len() - start);
        &self.events[start..start + len]
    }
}

/// An action that records its task name and trigger cursor.
pub fn record(task: &'static str) -> impl FnMut(&mut Trace, Iteration) + 'static {
    move |ctx, it| ctx.events.push(Event::Fire { task, h: it.get() })
}

/// Install recording callbacks for every loop-control hook.
pub fn install_recording_callbacks(seq: &mut LoopSequencer<Trace>) {
    seq.on_offset_counter(|ctx, delta| ctx.events.push(Event::OffsetCounter(delta)));
    seq.on_loop_start(|ctx, unroll| ctx.events.push(Event::LoopStart(unroll)));
    seq.on_loop_end(|ctx, unroll| ctx.events.push(Event::LoopEnd(unroll)));
    seq.on_jump_if_lt(|ctx, threshold, label| ctx.events.push(Event::JumpIfLt { threshold, label }));
    seq.on_jump_target(|ctx, label| ctx.events.push(Event::JumpTarget(label)));
    seq.on_jump(|ctx, label| ctx.events.push(Event::Jump(label)));
    seq.on_notify_phase(|ctx, phase| ctx.events.push(Event::Entered(phase)));
}

/// Analyze, materialize, and return the recorded trace.
pub fn run(mut seq: LoopSequencer<Trace>, expected_unroll: Option<i64>) -> Trace {
    install_recording_callbacks(&mut seq);
    seq.analyze(expected_unroll).expect("schedule should analyze");
    let mut trace = Trace::default();
    seq.materialize(&mut trace);
    trace
}
