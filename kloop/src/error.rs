use snafu::Snafu;

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Generation-time configuration faults.
///
/// Everything here is a planner/generator contract violation detected while
/// building the instruction sequence. The produced artifact has no error
/// surface: a configuration that passes generation runs unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Staging buffer count outside the supported ring sizes.
    #[snafu(display("staging buffer count must be in 0..=4, got {buffers}"))]
    UnsupportedBuffering { buffers: i64 },

    /// Both staged roles are present but their buffering periods disagree.
    #[snafu(display("staged roles disagree on buffering period: A lookahead {a_lookahead} != B lookahead {b_lookahead}"))]
    MismatchedStaging { a_lookahead: i64, b_lookahead: i64 },

    /// The schedule's derived unroll disagrees with the planner's block size.
    #[snafu(display("schedule unroll {computed} != planner unroll {expected}"))]
    UnrollMismatch { computed: i64, expected: i64 },

    /// Remainder activation state machine misuse.
    #[snafu(display("invalid remainder transition on {side:?}: {detail}"))]
    InvalidTransition { side: crate::state::Side, detail: &'static str },

    /// Activation requested for a side whose masks cannot be derived.
    #[snafu(display("no remainder bounds to derive {side:?} masks from"))]
    MasksUnavailable { side: crate::state::Side },

    /// A field-level contract violation in the planner record.
    #[snafu(display("invalid k-loop configuration: {reason}"))]
    InvalidConfig { reason: String },

    /// The task registry could not be linearized.
    #[snafu(display("schedule construction failed: {source}"))]
    Schedule { source: kweave_sequencer::Error },
}
