//! Staging-buffer synchronization choreography.
//!
//! Given the staging ring depth N, derive the fence/barrier sequence around
//! each staged store and reload so that a reader of slot `(h / ring) % N`
//! never observes an incomplete write, and a writer never overwrites a slot
//! still being read. Deeper rings buy latency hiding at the cost of extra
//! bookkeeping:
//!
//! | N | store                     | one iteration later      | two later |
//! |---|---------------------------|--------------------------|-----------|
//! | 1 | wait, store, signal+fence |                          |           |
//! | 2 | store, fence, fence-wait  |                          |           |
//! | 3 | store, signal+fence       | wait (at the consume)    |           |
//! | 4 | store                     | fence, fence-wait, signal| wait      |

use crate::config::KLoopConfig;
use crate::error::{ConfigError, Result};
use crate::stream::{BarrierKind, Emitter, Instr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingController {
    buffers: i64,
    unroll_staging: i64,
}

impl StagingController {
    /// Build the controller for a staged configuration, or `None` when no
    /// operand is staged. Co-scheduled roles with disagreeing buffering
    /// periods are a configuration error, never a runtime condition.
    pub fn from_config(cfg: &KLoopConfig) -> Result<Option<Self>> {
        if !cfg.staged() {
            return Ok(None);
        }
        if !(1..=4).contains(&cfg.staging_buffers) {
            return Err(ConfigError::UnsupportedBuffering { buffers: cfg.staging_buffers });
        }
        if cfg.features.stage_a && cfg.features.stage_b && cfg.load_lookahead_a() != cfg.load_lookahead_b() {
            return Err(ConfigError::MismatchedStaging {
                a_lookahead: cfg.load_lookahead_a(),
                b_lookahead: cfg.load_lookahead_b(),
            });
        }
        Ok(Some(Self { buffers: cfg.staging_buffers, unroll_staging: cfg.unroll_k_staging }))
    }

    pub fn buffers(&self) -> i64 {
        self.buffers
    }

    /// Ring slot written for the staging group containing step `h`.
    pub fn slot(&self, h: i64) -> i64 {
        (h.div_euclid(self.unroll_staging)).rem_euclid(self.buffers)
    }

    /// How far ahead of its consumers the store must land, in k units.
    /// One extra buffer of slack per ring step beyond double buffering.
    pub fn store_lookahead(&self) -> i64 {
        let slack_buffers = match self.buffers {
            1 => 0,
            2 | 3 => 1,
            4 => 2,
            _ => unreachable!("ring depth validated at construction"),
        };
        self.unroll_staging * slack_buffers + 1
    }

    /// Whether the ring defers synchronization to post-store checkpoints.
    pub fn has_after_store(&self) -> bool {
        self.buffers >= 3
    }

    pub fn has_after_store2(&self) -> bool {
        self.buffers >= 4
    }

    /// Arrivals contributed per store group, for barrier reconciliation.
    pub fn arrivals_per_store(&self) -> i64 {
        match self.buffers {
            2 => 0,
            _ => 1,
        }
    }

    /// Emit the store-and-publish sequence. `stores` emits the actual
    /// staging stores for every staged operand.
    pub fn emit_store(&self, e: &mut Emitter, stores: impl FnOnce(&mut Emitter)) {
        match self.buffers {
            1 => {
                // Single slot: prior readers must be done before the
                // overwrite, and the fresh data published before any read.
                e.push(Instr::Barrier { kind: BarrierKind::Wait, fence: false });
                stores(e);
                e.push(Instr::Barrier { kind: BarrierKind::Signal, fence: true });
            }
            2 => {
                // One generation of slack: a lightweight fence orders the
                // store against the next reload without a full barrier.
                stores(e);
                e.push(Instr::Fence);
                e.push(Instr::FenceWait);
            }
            3 => {
                // Publish now, wait at the matching consume point.
                stores(e);
                e.push(Instr::Barrier { kind: BarrierKind::Signal, fence: true });
            }
            4 => {
                stores(e);
            }
            _ => unreachable!("ring depth validated at construction"),
        }
    }

    /// Checkpoint one staging iteration after the store.
    pub fn emit_after_store(&self, e: &mut Emitter) {
        match self.buffers {
            3 => e.push(Instr::Barrier { kind: BarrierKind::Wait, fence: false }),
            4 => {
                e.push(Instr::Fence);
                e.push(Instr::FenceWait);
                e.push(Instr::Barrier { kind: BarrierKind::Signal, fence: false });
            }
            _ => unreachable!("no deferred checkpoint for ring depth {}", self.buffers),
        }
    }

    /// Checkpoint two staging iterations after the store (quad buffering).
    pub fn emit_after_store2(&self, e: &mut Emitter) {
        match self.buffers {
            4 => e.push(Instr::Barrier { kind: BarrierKind::Wait, fence: false }),
            _ => unreachable!("no second checkpoint for ring depth {}", self.buffers),
        }
    }
}
