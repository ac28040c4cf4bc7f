//! Planner-facing configuration for the k loop.
//!
//! The planner decides block sizes, buffer counts, and feature selection
//! upstream; this record is the frozen result. It is validated once before
//! any scheduling happens and treated as immutable afterwards; no feature
//! flag is ever re-derived mid-schedule.

use bon::bon;
use snafu::ensure;

use crate::error::{InvalidConfigSnafu, MismatchedStagingSnafu, Result, UnsupportedBufferingSnafu};

/// The enabled-feature set, computed once at the start of generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// Prefetch the A / B operand streams ahead of their loads.
    pub prefetch_a: bool,
    pub prefetch_b: bool,
    /// Route the A / B operand through on-chip staging memory.
    pub stage_a: bool,
    pub stage_b: bool,
    /// Repack loaded data into the layout the outer product consumes.
    pub repack_a: bool,
    pub repack_b: bool,
    /// Dequantize during repacking (implies the repack path).
    pub dequantize_a: bool,
    pub dequantize_b: bool,
    /// Accumulate per-row / per-column operand sums alongside the product.
    pub a_sums: bool,
    pub b_sums: bool,
    /// Re-mask loaded data in the k remainder.
    pub remask_a: bool,
    pub remask_b: bool,
    /// Interleave B before A wherever the two operands pair up.
    pub load_b_first: bool,
    /// Emit thread-switch stall hints after the load block.
    pub stall_after_load: bool,
    /// Delay address increments half a load period behind their loads.
    pub delay_ab_inc: bool,
    /// Move the counter decrement late in the body to shorten flag lifetime.
    pub late_loop_check: bool,
    /// Split periodic barriers into signal/wait halves.
    pub split_barrier: bool,
}

/// Static parameters of one k-loop generation.
///
/// All counts are in k-iteration units unless noted. `unroll_k` is the
/// planner's block size; the schedule's derived unroll must match it
/// exactly or generation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KLoopConfig {
    /// Planner-chosen unroll width of the main loop.
    pub unroll_k: i64,
    /// Main-path load granularities per operand.
    pub ka_load: i64,
    pub kb_load: i64,
    /// Remainder-path load granularities.
    pub ka_load_rem: i64,
    pub kb_load_rem: i64,
    /// Register-ring depth per operand (1 = single-buffered).
    pub a_copies: i64,
    pub b_copies: i64,
    /// Staging ring depth; 0 disables staging even if a stage flag is set.
    pub staging_buffers: i64,
    /// Copies of the global-to-staging transfer registers.
    pub staging_copies: i64,
    /// k-iterations covered by one staging buffer.
    pub unroll_k_staging: i64,
    /// Prefetch distances and strides.
    pub prefetch_a_dist: i64,
    pub prefetch_b_dist: i64,
    pub ka_pf_stride: i64,
    pub kb_pf_stride: i64,
    /// Outer-product batch width (main) and minimum granule.
    pub op_count: i64,
    pub op_count_min: i64,
    /// Periodic barrier interval; 0 disables periodic barriers.
    pub barrier_freq: i64,
    /// Target limits forwarded to the sequencer.
    pub max_unroll: i64,
    pub max_lookahead: i64,
    pub features: Features,
}

#[bon]
impl KLoopConfig {
    /// Build a configuration with the planner's usual defaults.
    #[builder]
    pub fn new(
        unroll_k: i64,
        ka_load: i64,
        kb_load: i64,
        ka_load_rem: Option<i64>,
        kb_load_rem: Option<i64>,
        #[builder(default = 1)] a_copies: i64,
        #[builder(default = 1)] b_copies: i64,
        #[builder(default = 0)] staging_buffers: i64,
        #[builder(default = 1)] staging_copies: i64,
        #[builder(default = 0)] unroll_k_staging: i64,
        #[builder(default = 0)] prefetch_a_dist: i64,
        #[builder(default = 0)] prefetch_b_dist: i64,
        #[builder(default = 0)] ka_pf_stride: i64,
        #[builder(default = 0)] kb_pf_stride: i64,
        op_count: Option<i64>,
        #[builder(default = 1)] op_count_min: i64,
        #[builder(default = 0)] barrier_freq: i64,
        #[builder(default = 256)] max_unroll: i64,
        #[builder(default = 256)] max_lookahead: i64,
        #[builder(default)] features: Features,
    ) -> Self {
        Self {
            unroll_k,
            ka_load,
            kb_load,
            ka_load_rem: ka_load_rem.unwrap_or(1),
            kb_load_rem: kb_load_rem.unwrap_or(1),
            a_copies,
            b_copies,
            staging_buffers,
            staging_copies,
            unroll_k_staging,
            prefetch_a_dist,
            prefetch_b_dist,
            ka_pf_stride: if ka_pf_stride > 0 { ka_pf_stride } else { ka_load },
            kb_pf_stride: if kb_pf_stride > 0 { kb_pf_stride } else { kb_load },
            op_count: op_count.unwrap_or(op_count_min),
            op_count_min,
            barrier_freq,
            max_unroll,
            max_lookahead,
            features,
        }
    }
}

impl KLoopConfig {
    /// Whether either operand is staged through on-chip memory.
    pub fn staged(&self) -> bool {
        (self.features.stage_a || self.features.stage_b) && self.staging_buffers > 0
    }

    /// Register-ring lookahead for the main-path loads of each operand.
    pub fn load_lookahead_a(&self) -> i64 {
        self.ka_load * (self.a_copies - 1)
    }

    pub fn load_lookahead_b(&self) -> i64 {
        self.kb_load * (self.b_copies - 1)
    }

    /// Reject contract violations before any scheduling happens.
    ///
    /// Divisibility requirements keep the schedule's LCM equal to the
    /// planner's `unroll_k`; everything else guards the policy tables
    /// downstream from impossible inputs.
    pub fn validate(&self) -> Result<()> {
        let f = &self.features;

        ensure!(self.unroll_k > 0, InvalidConfigSnafu { reason: format!("unroll_k must be positive, got {}", self.unroll_k) });

        for (name, value) in [("ka_load", self.ka_load), ("kb_load", self.kb_load)] {
            ensure!(
                value > 0 && self.unroll_k % value == 0,
                InvalidConfigSnafu { reason: format!("{name} must divide unroll_k, got {value}") }
            );
        }
        ensure!(
            self.ka_load_rem > 0 && self.ka_load % self.ka_load_rem == 0,
            InvalidConfigSnafu { reason: format!("ka_load_rem must divide ka_load, got {}", self.ka_load_rem) }
        );
        ensure!(
            self.kb_load_rem > 0 && self.kb_load % self.kb_load_rem == 0,
            InvalidConfigSnafu { reason: format!("kb_load_rem must divide kb_load, got {}", self.kb_load_rem) }
        );
        for (name, value) in [("a_copies", self.a_copies), ("b_copies", self.b_copies)] {
            ensure!((1..=4).contains(&value), InvalidConfigSnafu { reason: format!("{name} must be in 1..=4, got {value}") });
        }

        ensure!((0..=4).contains(&self.staging_buffers), UnsupportedBufferingSnafu { buffers: self.staging_buffers });
        if self.staged() {
            ensure!(
                self.unroll_k_staging > 0 && self.unroll_k % self.unroll_k_staging == 0,
                InvalidConfigSnafu {
                    reason: format!("unroll_k_staging must divide unroll_k, got {}", self.unroll_k_staging)
                }
            );
            ensure!(
                (1..=4).contains(&self.staging_copies),
                InvalidConfigSnafu { reason: format!("staging_copies must be in 1..=4, got {}", self.staging_copies) }
            );
            // Ring slot indices are baked into the unrolled pattern, so the
            // ring must complete whole rotations per pattern.
            ensure!(
                (self.unroll_k / self.unroll_k_staging) % self.staging_buffers == 0,
                InvalidConfigSnafu {
                    reason: format!(
                        "staging ring of {} must rotate wholly within unroll_k (groups per pattern: {})",
                        self.staging_buffers,
                        self.unroll_k / self.unroll_k_staging
                    )
                }
            );
            // Staged reloads must stay within one staging group.
            if f.stage_a {
                ensure!(
                    self.ka_load <= self.unroll_k_staging,
                    InvalidConfigSnafu { reason: format!("staged ka_load {} exceeds unroll_k_staging", self.ka_load) }
                );
            }
            if f.stage_b {
                ensure!(
                    self.kb_load <= self.unroll_k_staging,
                    InvalidConfigSnafu { reason: format!("staged kb_load {} exceeds unroll_k_staging", self.kb_load) }
                );
            }
            // Co-scheduled staged roles must agree on buffering period.
            if f.stage_a && f.stage_b {
                ensure!(
                    self.load_lookahead_a() == self.load_lookahead_b(),
                    MismatchedStagingSnafu {
                        a_lookahead: self.load_lookahead_a(),
                        b_lookahead: self.load_lookahead_b()
                    }
                );
            }
        }

        ensure!(
            self.op_count_min > 0
                && self.op_count % self.op_count_min == 0
                && self.op_count <= self.unroll_k
                && self.unroll_k % self.op_count == 0,
            InvalidConfigSnafu {
                reason: format!("op_count {} / op_count_min {} must nest within unroll_k", self.op_count, self.op_count_min)
            }
        );

        if self.barrier_freq > 0 {
            ensure!(
                self.unroll_k % self.barrier_freq == 0,
                InvalidConfigSnafu { reason: format!("barrier_freq must divide unroll_k, got {}", self.barrier_freq) }
            );
        }

        for (name, enabled, stride) in [
            ("ka_pf_stride", f.prefetch_a, self.ka_pf_stride),
            ("kb_pf_stride", f.prefetch_b, self.kb_pf_stride),
        ] {
            if enabled {
                ensure!(
                    stride > 0 && self.unroll_k % stride == 0,
                    InvalidConfigSnafu { reason: format!("{name} must divide unroll_k, got {stride}") }
                );
            }
        }

        // Dequantization runs inside the repack task.
        ensure!(
            (!f.dequantize_a || f.repack_a) && (!f.dequantize_b || f.repack_b),
            InvalidConfigSnafu { reason: "dequantization requires the repack path".to_string() }
        );
        // Staged operands are re-masked on the staging side, not here.
        ensure!(
            !(f.remask_a && f.stage_a) && !(f.remask_b && f.stage_b),
            InvalidConfigSnafu { reason: "register remasking and staging are mutually exclusive per operand".to_string() }
        );

        Ok(())
    }
}
