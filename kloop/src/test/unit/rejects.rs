//! Invalid configurations are rejected at generation time, never folded
//! into a subtly wrong instruction sequence.

use crate::config::{Features, KLoopConfig};
use crate::error::ConfigError;
use crate::test::helpers::{bounds, plain_config};
use crate::KLoopGenerator;

fn generate(cfg: KLoopConfig) -> Result<(), ConfigError> {
    KLoopGenerator::new(cfg, bounds()).generate().map(|_| ())
}

#[test]
fn load_granularity_must_divide_unroll() {
    let cfg = KLoopConfig::builder().unroll_k(8).ka_load(3).kb_load(4).build();
    assert!(matches!(generate(cfg), Err(ConfigError::InvalidConfig { .. })));
}

#[test]
fn staging_ring_depth_is_bounded() {
    let cfg = KLoopConfig::builder()
        .unroll_k(8)
        .ka_load(4)
        .kb_load(4)
        .staging_buffers(5)
        .unroll_k_staging(4)
        .features(Features { stage_a: true, ..Default::default() })
        .build();
    assert_eq!(generate(cfg), Err(ConfigError::UnsupportedBuffering { buffers: 5 }));
}

#[test]
fn mismatched_staged_roles_fail_generation() {
    let cfg = KLoopConfig::builder()
        .unroll_k(8)
        .ka_load(4)
        .kb_load(4)
        .a_copies(2)
        .b_copies(3)
        .staging_buffers(2)
        .unroll_k_staging(4)
        .features(Features { stage_a: true, stage_b: true, ..Default::default() })
        .build();
    assert!(matches!(generate(cfg), Err(ConfigError::MismatchedStaging { .. })));
}

#[test]
fn partial_ring_rotation_is_rejected() {
    // Two staging groups per pattern cannot carry a three-deep ring.
    let cfg = KLoopConfig::builder()
        .unroll_k(8)
        .ka_load(4)
        .kb_load(4)
        .staging_buffers(3)
        .unroll_k_staging(4)
        .features(Features { stage_a: true, ..Default::default() })
        .build();
    assert!(matches!(generate(cfg), Err(ConfigError::InvalidConfig { .. })));
}

#[test]
fn dequantize_without_repack_is_rejected() {
    let mut cfg = plain_config();
    cfg.features.dequantize_a = true;
    assert!(matches!(generate(cfg), Err(ConfigError::InvalidConfig { .. })));
}

#[test]
fn remasking_a_staged_operand_is_rejected() {
    let cfg = KLoopConfig::builder()
        .unroll_k(8)
        .ka_load(4)
        .kb_load(4)
        .staging_buffers(2)
        .unroll_k_staging(4)
        .features(Features { stage_a: true, remask_a: true, ..Default::default() })
        .build();
    assert!(matches!(generate(cfg), Err(ConfigError::InvalidConfig { .. })));
}

#[test]
fn op_batching_must_nest_within_the_unroll() {
    let mut cfg = plain_config();
    cfg.op_count = 3;
    assert!(matches!(generate(cfg), Err(ConfigError::InvalidConfig { .. })));
}

#[test]
fn unsatisfiable_lookahead_surfaces_as_schedule_error() {
    let mut cfg = plain_config();
    cfg.max_lookahead = 2; // register ring needs lookahead 4
    assert!(matches!(
        generate(cfg),
        Err(ConfigError::Schedule { source: kweave_sequencer::Error::UnsatisfiableLookahead { .. } })
    ));
}
