//! The k-loop generator.
//!
//! Wires every recurring operation of one blocked-reduction step (operand
//! loads, address increments, staging traffic, repacking, remasking,
//! synchronization, and the outer product itself) into a [`LoopSequencer`]
//! task registry, installs the loop-control callbacks, and materializes the
//! finished instruction stream.

use kweave_sequencer::phases::{LABEL_BOTTOM, LABEL_SHORT, LABEL_SHORT_END, LabelId};
use kweave_sequencer::{Alt, Iteration, Limits, LoopSequencer, Phase, Requirement};
use smallvec::SmallVec;
use tracing::debug;

use crate::buffering::StagingController;
use crate::config::KLoopConfig;
use crate::error::{ConfigError, Result};
use crate::reconcile::{ArrivalSource, BarrierBudget, emit_reconciliation};
use crate::state::{GenState, RemainderBounds, Side};
use crate::stream::{BarrierKind, Emitter, Instr, Label, Operand};

/// The finished artifact: an ordered instruction sequence plus the named
/// jump targets loop-control code branches through.
#[derive(Debug)]
pub struct KLoop {
    pub instrs: Vec<Instr>,
    pub unroll_k: i64,
    pub short_entry: Label,
    pub bottom: Label,
}

/// Generation context threaded through every task action and callback.
pub(crate) struct Emission {
    pub e: Emitter,
    pub state: GenState,
    snapshot: GenState,
    pub phase: Option<Phase>,
    seq_labels: Vec<Option<Label>>,
    loop_top: Option<Label>,
    pub did_force_activate_a: bool,
    pub did_force_activate_b: bool,
    error: Option<ConfigError>,
}

impl Emission {
    fn new(state: GenState) -> Self {
        let snapshot = state.clone();
        Self {
            e: Emitter::new(),
            state,
            snapshot,
            phase: None,
            seq_labels: Vec::new(),
            loop_top: None,
            did_force_activate_a: false,
            did_force_activate_b: false,
            error: None,
        }
    }

    /// Map a sequencer label id to a stream label, allocating on first use.
    fn label(&mut self, id: LabelId) -> Label {
        if id >= self.seq_labels.len() {
            self.seq_labels.resize(id + 1, None);
        }
        match self.seq_labels[id] {
            Some(label) => label,
            None => {
                let label = self.e.new_label();
                self.seq_labels[id] = Some(label);
                label
            }
        }
    }

    /// Activate remainder bindings, recording the first failure for the
    /// generator to surface after materialization.
    fn activate(&mut self, side: Side, k_offset: i64) {
        if let Err(err) = self.state.activate(side, k_offset)
            && self.error.is_none()
        {
            self.error = Some(err);
        }
    }
}

/// Builds the k loop for one planner configuration and remainder shape.
pub struct KLoopGenerator {
    cfg: KLoopConfig,
    bounds: RemainderBounds,
}

impl KLoopGenerator {
    pub fn new(cfg: KLoopConfig, bounds: RemainderBounds) -> Self {
        Self { cfg, bounds }
    }

    /// Generate the complete instruction sequence.
    ///
    /// Fails on any configuration contract violation; a stream that is
    /// returned needs no further validation.
    pub fn generate(&self) -> Result<KLoop> {
        self.cfg.validate()?;
        let cfg = &self.cfg;
        let f = cfg.features;
        let staging = StagingController::from_config(cfg)?;

        let unroll = cfg.unroll_k;
        let (ka, kb) = (cfg.ka_load, cfg.kb_load);
        let (kar, kbr) = (cfg.ka_load_rem, cfg.kb_load_rem);
        let (ac, bc) = (cfg.a_copies, cfg.b_copies);
        let us = cfg.unroll_k_staging;
        let scopies = cfg.staging_copies;

        let la_a = cfg.load_lookahead_a();
        let la_b = cfg.load_lookahead_b();
        let la_a_rem = kar * (ac - 1);
        let la_b_rem = kbr * (bc - 1);

        // Staging chains its own lookahead in front of the reload distance:
        // transfer-register slack, ring slack, then the register ring.
        let (la_staging_load, la_reload, la_reload_rem, dur_staging) = match &staging {
            Some(ctl) => {
                let load = us * (scopies - 1) + us - 1;
                let store = ctl.store_lookahead();
                let reload = if f.stage_a { la_a } else { la_b };
                let reload_rem = if f.stage_a { la_a_rem } else { la_b_rem };
                let dur = i64::max(if f.stage_a { ka } else { 0 }, if f.stage_b { kb } else { 0 }).max(1);
                (load, store + reload, store + reload_rem, dur)
            }
            None => (0, 0, 0, 1),
        };
        let la_a_global = if f.stage_a { la_staging_load + la_reload } else { la_a };
        let la_b_global = if f.stage_b { la_staging_load + la_reload } else { la_b };

        let req_load_a = Requirement::every(ka).duration(ka).variants(ac).lookahead(la_a);
        let req_load_a_rem = Requirement::every(kar).variants(ac).lookahead(la_a_rem);
        let req_load_b = Requirement::every(kb).duration(kb).variants(bc).lookahead(la_b);
        let req_load_b_rem = Requirement::every(kbr).variants(bc).lookahead(la_b_rem);

        let mut seq: LoopSequencer<Emission> =
            LoopSequencer::new(Limits { max_unroll: cfg.max_unroll, max_lookahead: cfg.max_lookahead });

        // Framing task, extending the unroll to the planner's block size
        // even when every real task recurs faster.
        seq.schedule(Requirement::every(unroll).check_optional(), |_, _| {});

        // Operand prefetch.
        if f.prefetch_a {
            let req = Requirement::every(cfg.ka_pf_stride)
                .duration(cfg.ka_pf_stride)
                .lookahead(cfg.prefetch_a_dist + la_a_global);
            seq.schedule(req, |ctx, it| ctx.e.push(Instr::Prefetch { op: Operand::A, h: it.get() }));
        }
        if f.prefetch_b {
            let req = Requirement::every(cfg.kb_pf_stride)
                .duration(cfg.kb_pf_stride)
                .lookahead(cfg.prefetch_b_dist + la_b_global);
            seq.schedule(req, |ctx, it| ctx.e.push(Instr::Prefetch { op: Operand::B, h: it.get() }));
        }

        // Staging loads: global memory into the transfer-register ring.
        if staging.is_some() {
            let (sa, sb) = (f.stage_a, f.stage_b);
            let req_main =
                Requirement::every(us).duration(us).variants(scopies).lookahead(la_staging_load + la_reload);
            let req_rem = Requirement::every(us).variants(scopies).lookahead(la_staging_load + la_reload_rem);
            seq.schedule_alts(vec![
                Alt::new(req_main, move |ctx: &mut Emission, it| {
                    let copy = (it / us) % scopies;
                    if sa {
                        ctx.e.push(Instr::StageLoad { op: Operand::A, h: it.get(), copy, remainder: false });
                    }
                    if sb {
                        ctx.e.push(Instr::StageLoad { op: Operand::B, h: it.get(), copy, remainder: false });
                    }
                }),
                Alt::new(req_rem, move |ctx: &mut Emission, it| {
                    ctx.activate(Side::Staging, it.counter_offset());
                    let copy = (it / us) % scopies;
                    if sa {
                        ctx.e.push(Instr::StageLoad { op: Operand::A, h: it.get(), copy, remainder: true });
                    }
                    if sb {
                        ctx.e.push(Instr::StageLoad { op: Operand::B, h: it.get(), copy, remainder: true });
                    }
                }),
            ]);
        }

        // Prezero partially loaded remainder registers when the remainder
        // load granule is finer than the outer-product granule.
        let oc_min = cfg.op_count_min;
        let prezero_a = !f.stage_a && kar < oc_min;
        let prezero_b = !f.stage_b && kbr < oc_min;
        if prezero_a {
            seq.schedule_alts(vec![
                Alt::new(req_load_a, |_, _| {}),
                Alt::new(Requirement::every(oc_min).variants(ac).lookahead(la_a_rem), |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::ZeroFill { op: Operand::A, h: it.get() })
                }),
            ]);
        }
        if prezero_b {
            seq.schedule_alts(vec![
                Alt::new(req_load_b, |_, _| {}),
                Alt::new(Requirement::every(oc_min).variants(bc).lookahead(la_b_rem), |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::ZeroFill { op: Operand::B, h: it.get() })
                }),
            ]);
        }
        if prezero_a && prezero_b && f.load_b_first {
            seq.swap_last_two();
        }

        // Enforced remainder activation: remasked operands need their
        // remainder bindings live before the first partial load, whether or
        // not that load's own step is reached.
        if f.remask_a {
            seq.schedule_alts(vec![
                Alt::guarded(req_load_a, |_, _| {}, |_, _| false),
                Alt::guarded(
                    req_load_a_rem.unconditional(),
                    |ctx: &mut Emission, it| {
                        ctx.activate(Side::A, it.counter_offset());
                        ctx.did_force_activate_a = true;
                    },
                    |ctx: &Emission, _| !ctx.did_force_activate_a,
                ),
            ]);
        }
        if f.remask_b {
            seq.schedule_alts(vec![
                Alt::guarded(req_load_b, |_, _| {}, |_, _| false),
                Alt::guarded(
                    req_load_b_rem.unconditional(),
                    |ctx: &mut Emission, it| {
                        ctx.activate(Side::B, it.counter_offset());
                        ctx.did_force_activate_b = true;
                    },
                    |ctx: &Emission, _| !ctx.did_force_activate_b,
                ),
            ]);
        }

        // Operand loads, main and remainder paths.
        seq.schedule_alts(vec![
            Alt::new(req_load_a, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::Load { op: Operand::A, h: it.get(), copy: (it / ka) % ac, remainder: false });
            }),
            Alt::new(req_load_a_rem, move |ctx: &mut Emission, it| {
                ctx.activate(Side::A, it.counter_offset());
                ctx.e.push(Instr::Load { op: Operand::A, h: it.get(), copy: (it / kar) % ac, remainder: true });
            }),
        ]);
        seq.schedule_alts(vec![
            Alt::new(req_load_b, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::Load { op: Operand::B, h: it.get(), copy: (it / kb) % bc, remainder: false });
            }),
            Alt::new(req_load_b_rem, move |ctx: &mut Emission, it| {
                ctx.activate(Side::B, it.counter_offset());
                ctx.e.push(Instr::Load { op: Operand::B, h: it.get(), copy: (it / kbr) % bc, remainder: true });
            }),
        ]);
        if f.load_b_first {
            seq.swap_last_two();
        }

        // Thread-switch stall hints after the load block.
        if f.stall_after_load {
            seq.schedule(Requirement::every(lcm(ka, kb)).check_optional(), |ctx: &mut Emission, _| {
                ctx.e.push(Instr::Stall)
            });
        }

        // Counter decrement and loop check, active only in the steady state.
        let mut req_check = Requirement::every(unroll).duration(unroll);
        if f.late_loop_check {
            req_check = req_check.delay(unroll - ka.min(kb));
        }
        seq.schedule_if(
            req_check,
            move |ctx: &mut Emission, _| ctx.e.push(Instr::CounterAdd { delta: -unroll }),
            |ctx: &Emission, _| ctx.phase == Some(Phase::MainLoop),
        );

        // Staging store-side address increments, rewinding the ring on its
        // last slot.
        if let Some(ctl) = staging.filter(|c| c.buffers() >= 2) {
            let (sa, sb) = (f.stage_a, f.stage_b);
            let inc = move |ctx: &mut Emission, it: Iteration| {
                let delta = if ctl.slot(it.get()) == ctl.buffers() - 1 { -(ctl.buffers() - 1) * us } else { us };
                if sa {
                    ctx.e.push(Instr::StageAddrInc { op: Operand::A, h: it.get(), delta });
                }
                if sb {
                    ctx.e.push(Instr::StageAddrInc { op: Operand::B, h: it.get(), delta });
                }
            };
            seq.schedule_alts(vec![
                Alt::new(
                    Requirement::every(us).duration(dur_staging).variants(scopies).lookahead(la_reload).delay(1),
                    inc,
                ),
                Alt::new(Requirement::every(us).variants(scopies).lookahead(la_reload_rem).delay(1), inc),
            ]);
        }

        // Prefetch address increments, optionally delayed half a stride.
        if f.prefetch_a {
            let stride = cfg.ka_pf_stride;
            let delay = if f.delay_ab_inc { stride / 2 } else { 0 };
            let req = Requirement::every(stride)
                .duration(stride)
                .lookahead(cfg.prefetch_a_dist + la_a_global)
                .delay(delay);
            seq.schedule(req, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::PrefetchInc { op: Operand::A, h: it.get(), delta: stride })
            });
        }
        if f.prefetch_b {
            let stride = cfg.kb_pf_stride;
            let delay = if f.delay_ab_inc { stride / 2 } else { 0 };
            let req = Requirement::every(stride)
                .duration(stride)
                .lookahead(cfg.prefetch_b_dist + la_b_global)
                .delay(delay);
            seq.schedule(req, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::PrefetchInc { op: Operand::B, h: it.get(), delta: stride })
            });
        }
        if f.prefetch_a && f.prefetch_b && f.load_b_first {
            seq.swap_last_two();
        }

        // Operand address increments. Staged operands wrap their address
        // back to the ring start instead of marching through memory.
        let wrap = staging.map(|c| us * c.buffers());
        let delay_a = if f.delay_ab_inc && ac > 1 { ka / 2 } else { 0 };
        let delay_b = if f.delay_ab_inc && bc > 1 { kb / 2 } else { 0 };
        let wrap_a = if f.stage_a { wrap } else { None };
        let wrap_b = if f.stage_b { wrap } else { None };
        seq.schedule_alts(vec![
            Alt::new(req_load_a.delay(delay_a), move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::AddrInc { op: Operand::A, h: it.get(), delta: wrapped_inc(it.get(), ka, wrap_a), remainder: false });
            }),
            Alt::new(req_load_a_rem, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::AddrInc { op: Operand::A, h: it.get(), delta: wrapped_inc(it.get(), kar, wrap_a), remainder: true });
            }),
        ]);
        seq.schedule_alts(vec![
            Alt::new(req_load_b.delay(delay_b), move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::AddrInc { op: Operand::B, h: it.get(), delta: wrapped_inc(it.get(), kb, wrap_b), remainder: false });
            }),
            Alt::new(req_load_b_rem, move |ctx: &mut Emission, it| {
                ctx.e.push(Instr::AddrInc { op: Operand::B, h: it.get(), delta: wrapped_inc(it.get(), kbr, wrap_b), remainder: true });
            }),
        ]);
        if f.load_b_first {
            seq.swap_last_two();
        }

        // Remainder remasking: one setup per remask period, one apply per
        // remainder load.
        if f.remask_a || f.remask_b {
            let period = lcm(if f.remask_a { kar } else { 1 }, if f.remask_b { kbr } else { 1 });
            seq.schedule_alts(vec![
                Alt::new(Requirement::every(period).duration(period), |_, _| {}),
                Alt::new(Requirement::every(period), move |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::RemaskSetup { period, offset: -it.counter_offset() })
                }),
            ]);
        }
        if f.remask_a {
            seq.schedule_alts(vec![
                Alt::new(req_load_a, |_, _| {}),
                Alt::new(Requirement::every(kar).variants(ac), |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Remask { op: Operand::A, h: it.get() })
                }),
            ]);
        }
        if f.remask_b {
            seq.schedule_alts(vec![
                Alt::new(req_load_b, |_, _| {}),
                Alt::new(Requirement::every(kbr).variants(bc), |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Remask { op: Operand::B, h: it.get() })
                }),
            ]);
        }
        if f.remask_a && f.remask_b && f.load_b_first {
            seq.swap_last_two();
        }

        // Register repacking / dequantization between load and consume.
        if f.repack_a {
            let deq = f.dequantize_a;
            seq.schedule_alts(vec![
                Alt::new(Requirement::every(ka).variants(ac), move |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Repack { op: Operand::A, h: it.get(), dequantize: deq, remainder: false })
                }),
                Alt::new(Requirement::every(kar).variants(ac), move |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Repack { op: Operand::A, h: it.get(), dequantize: deq, remainder: true })
                }),
            ]);
        }
        if f.repack_b {
            let deq = f.dequantize_b;
            seq.schedule_alts(vec![
                Alt::new(Requirement::every(kb).variants(bc), move |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Repack { op: Operand::B, h: it.get(), dequantize: deq, remainder: false })
                }),
                Alt::new(Requirement::every(kbr).variants(bc), move |ctx: &mut Emission, it| {
                    ctx.e.push(Instr::Repack { op: Operand::B, h: it.get(), dequantize: deq, remainder: true })
                }),
            ]);
        }
        if f.repack_a && f.repack_b && f.load_b_first {
            seq.swap_last_two();
        }

        // Outer products, batched across k in the steady state and emitted
        // at minimum granularity in the tails. The trigger sits at the start
        // of each granule; emission is delayed to the granule's last slot.
        let oc = cfg.op_count;
        let (a_sums, b_sums) = (f.a_sums, f.b_sums);
        seq.schedule_alts(vec![
            Alt::new(Requirement::every(oc_min).lookahead(-(oc_min - 1)), move |ctx: &mut Emission, it| {
                let h = it.get();
                if (h + oc_min) % oc != 0 {
                    return;
                }
                let h0 = h + oc_min - oc;
                ctx.e.push(Instr::OuterProduct { h: h0, count: oc, remainder: false });
                if a_sums {
                    ctx.e.push(Instr::AccumulateSums { op: Operand::A, h: h0 });
                }
                if b_sums {
                    ctx.e.push(Instr::AccumulateSums { op: Operand::B, h: h0 });
                }
            }),
            Alt::new(Requirement::every(oc_min), move |ctx: &mut Emission, it| {
                let h = it.get();
                ctx.e.push(Instr::OuterProduct { h, count: oc_min, remainder: true });
                if a_sums {
                    ctx.e.push(Instr::AccumulateSums { op: Operand::A, h });
                }
                if b_sums {
                    ctx.e.push(Instr::AccumulateSums { op: Operand::B, h });
                }
            }),
        ]);

        // Staged repacking ahead of the store, remasking the final partial
        // staging group.
        if staging.is_some() && ((f.repack_a && f.stage_a) || (f.repack_b && f.stage_b)) {
            let ra = f.repack_a && f.stage_a;
            let rb = f.repack_b && f.stage_b;
            let (da, db) = (f.dequantize_a, f.dequantize_b);
            seq.schedule_alts(vec![
                Alt::new(
                    Requirement::every(us).duration(dur_staging).variants(scopies).lookahead(la_reload),
                    move |ctx: &mut Emission, it| {
                        if ra {
                            ctx.e.push(Instr::Repack { op: Operand::A, h: it.get(), dequantize: da, remainder: false });
                        }
                        if rb {
                            ctx.e.push(Instr::Repack { op: Operand::B, h: it.get(), dequantize: db, remainder: false });
                        }
                    },
                ),
                Alt::new(Requirement::every(us).variants(scopies).lookahead(la_reload_rem), move |ctx: &mut Emission, it| {
                    let partial = it.remaining() < us;
                    if ra {
                        if partial {
                            ctx.e.push(Instr::Remask { op: Operand::A, h: it.get() });
                        }
                        ctx.e.push(Instr::Repack { op: Operand::A, h: it.get(), dequantize: da, remainder: true });
                    }
                    if rb {
                        if partial {
                            ctx.e.push(Instr::Remask { op: Operand::B, h: it.get() });
                        }
                        ctx.e.push(Instr::Repack { op: Operand::B, h: it.get(), dequantize: db, remainder: true });
                    }
                }),
            ]);
        }

        // Staging stores and their deferred synchronization checkpoints,
        // latest checkpoint first so each lands ahead of the next store.
        if let Some(ctl) = staging {
            let (sa, sb) = (f.stage_a, f.stage_b);
            if ctl.has_after_store2() {
                seq.schedule_alts(vec![
                    Alt::new(
                        Requirement::every(us).duration(dur_staging).variants(scopies).lookahead(la_reload - 2 * us),
                        move |ctx: &mut Emission, _| ctl.emit_after_store2(&mut ctx.e),
                    ),
                    Alt::new(
                        Requirement::every(us).variants(scopies).lookahead(la_reload_rem - 2 * us),
                        move |ctx: &mut Emission, _| ctl.emit_after_store2(&mut ctx.e),
                    ),
                ]);
            }
            if ctl.has_after_store() {
                seq.schedule_alts(vec![
                    Alt::new(
                        Requirement::every(us).duration(dur_staging).variants(scopies).lookahead(la_reload - us),
                        move |ctx: &mut Emission, _| ctl.emit_after_store(&mut ctx.e),
                    ),
                    Alt::new(
                        Requirement::every(us).variants(scopies).lookahead(la_reload_rem - us),
                        move |ctx: &mut Emission, _| ctl.emit_after_store(&mut ctx.e),
                    ),
                ]);
            }
            let store = move |ctx: &mut Emission, it: Iteration| {
                let h = it.get();
                let buffer = ctl.slot(h);
                ctl.emit_store(&mut ctx.e, |e| {
                    if sa {
                        e.push(Instr::StageStore { op: Operand::A, h, buffer });
                    }
                    if sb {
                        e.push(Instr::StageStore { op: Operand::B, h, buffer });
                    }
                });
            };
            seq.schedule_alts(vec![
                Alt::new(Requirement::every(us).duration(dur_staging).variants(scopies).lookahead(la_reload), store),
                Alt::new(Requirement::every(us).variants(scopies).lookahead(la_reload_rem), store),
            ]);
        }

        // Periodic barriers, phase-anchored at the end of each interval.
        let freq = cfg.barrier_freq;
        let split = f.split_barrier;
        if freq > 0 {
            seq.schedule(Requirement::every(freq).phase(freq - 1).unconditional(), move |ctx: &mut Emission, _| {
                if ctx.phase != Some(Phase::MainLoop) {
                    return;
                }
                if split {
                    ctx.e.push(Instr::Barrier { kind: BarrierKind::Wait, fence: false });
                    ctx.e.push(Instr::Barrier { kind: BarrierKind::Signal, fence: false });
                } else {
                    ctx.e.push(Instr::Barrier { kind: BarrierKind::Normal, fence: false });
                }
            });
        }

        // Loop-control callbacks.
        seq.on_offset_counter(|ctx: &mut Emission, delta| ctx.e.push(Instr::CounterAdd { delta }));
        seq.on_loop_start(move |ctx: &mut Emission, _| {
            if split && freq > 0 {
                ctx.e.push(Instr::Barrier { kind: BarrierKind::Signal, fence: false });
            }
            let top = ctx.e.new_label();
            ctx.loop_top = Some(top);
            ctx.e.place(top);
        });
        seq.on_loop_end(|ctx: &mut Emission, _| {
            let top = ctx.loop_top.expect("loop head placed before loop end");
            ctx.e.push(Instr::LoopBranch { target: top });
        });
        seq.on_jump_if_lt(|ctx: &mut Emission, threshold, id| {
            let target = ctx.label(id);
            ctx.e.push(Instr::JumpIfCounterLt { threshold, target });
        });
        seq.on_jump_target(|ctx: &mut Emission, id| {
            let label = ctx.label(id);
            ctx.e.place(label);
        });
        seq.on_jump(|ctx: &mut Emission, id| {
            let target = ctx.label(id);
            ctx.e.push(Instr::Jump { target });
        });
        seq.on_notify_phase(move |ctx: &mut Emission, phase| {
            ctx.phase = Some(phase);
            match phase {
                // Drain the outstanding split-barrier signal exactly once at
                // main-loop exit, never inside the repeating body.
                Phase::MainPathEnd => {
                    if split && freq > 0 {
                        ctx.e.push(Instr::Barrier { kind: BarrierKind::Wait, fence: false });
                    }
                }
                // The short path starts from the pre-scheduling snapshot:
                // warmup may have mutated shared bindings, so state is
                // restored, not re-initialized.
                Phase::ShortLoop => {
                    let snapshot = ctx.snapshot.clone();
                    ctx.state.restore(&snapshot);
                    ctx.did_force_activate_a = false;
                    ctx.did_force_activate_b = false;
                }
                _ => {}
            }
        });

        seq.analyze(Some(unroll)).map_err(|err| match err {
            kweave_sequencer::Error::UnrollMismatch { computed, expected } => {
                ConfigError::UnrollMismatch { computed, expected }
            }
            source => ConfigError::Schedule { source },
        })?;
        debug!(unroll = seq.unroll(), warmup = seq.warmup(), "k-loop schedule analyzed");

        let mut ctx = Emission::new(GenState::new(Some(self.bounds)));
        let short_entry = ctx.label(LABEL_SHORT);
        let bottom = ctx.label(LABEL_BOTTOM);
        let _ = ctx.label(LABEL_SHORT_END);
        seq.materialize(&mut ctx);
        if let Some(err) = ctx.error.take() {
            return Err(err);
        }

        // Sibling contexts may carry different trip counts; pad barrier
        // arrivals up to the static maximum so every lane participates the
        // same number of times.
        let mut sources: SmallVec<[ArrivalSource; 2]> = SmallVec::new();
        if freq > 0 {
            sources.push(ArrivalSource { period: freq, phase: freq - 1, lookahead: 0, main_only: true });
        }
        if let Some(ctl) = &staging
            && ctl.arrivals_per_store() == 1
        {
            let lookahead = if ctl.has_after_store2() { la_reload - us } else { la_reload };
            sources.push(ArrivalSource { period: us, phase: 0, lookahead, main_only: false });
        }
        let budget = BarrierBudget {
            unroll,
            entry_arrivals: if split && freq > 0 { 1 } else { 0 },
            sources,
        };
        emit_reconciliation(&mut ctx.e, budget);

        Ok(KLoop { instrs: ctx.e.finish(), unroll_k: unroll, short_entry, bottom })
    }
}

/// Address-increment delta with staging-ring wraparound.
fn wrapped_inc(h: i64, inc: i64, wrap: Option<i64>) -> i64 {
    match wrap {
        Some(w) if (h + inc).rem_euclid(w) < inc => inc - w,
        _ => inc,
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
