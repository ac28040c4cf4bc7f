use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Schedule construction failures.
///
/// All of these are generation-time configuration faults: the planner and
/// the task registry disagree in a way no finite static schedule can
/// reconcile. None of them can occur at run time of the produced sequence.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No tasks were registered before analysis.
    #[snafu(display("cannot analyze an empty task registry"))]
    EmptyRegistry,

    /// A requirement carried a non-positive period.
    #[snafu(display("requirement period must be positive, got {period}"))]
    InvalidPeriod { period: i64 },

    /// A requirement's occupied window exceeds its recurrence period.
    #[snafu(display("duration {duration} exceeds period {period}"))]
    DurationExceedsPeriod { duration: i64, period: i64 },

    /// A requirement carried a variant count outside the supported ring sizes.
    #[snafu(display("variant count must be in 1..=4, got {variants}"))]
    InvalidVariants { variants: i64 },

    /// The LCM of registered periods exceeds the planner-supplied bound.
    #[snafu(display("unroll width {computed} exceeds maximum {max}"))]
    UnrollOverflow { computed: i64, max: i64 },

    /// The computed unroll disagrees with the planner's expected unroll.
    #[snafu(display("computed unroll {computed} != expected unroll {expected}"))]
    UnrollMismatch { computed: i64, expected: i64 },

    /// A lookahead cannot be honored by any finite warmup.
    #[snafu(display("lookahead {lookahead} exceeds maximum {max}"))]
    UnsatisfiableLookahead { lookahead: i64, max: i64 },
}
