use derive_more::IsVariant;
use snafu::{Location, Snafu};

/// Errors that can occur while placing nodes in an [`Mm`](crate::Mm).
#[derive(Debug, Snafu, IsVariant)]
#[snafu(visibility(pub(crate)))]
pub enum MmError {
    /// No hole satisfies the placement request.
    #[snafu(display(
        "no hole fits {size:#x} bytes aligned to {alignment:#x} in {range_start:#x}..{range_end:#x}"
    ))]
    NoSpace {
        size: u64,
        alignment: u64,
        range_start: u64,
        range_end: u64,
        #[snafu(implicit)]
        location: Location,
    },
    /// A fixed-address reservation collides with an existing allocation.
    #[snafu(display("range {start:#x}..{end:#x} is already in use"))]
    InUse {
        start: u64,
        end: u64,
        #[snafu(implicit)]
        location: Location,
    },
    /// Malformed parameters.
    #[snafu(display("invalid argument: {reason}"))]
    Invalid {
        reason: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
}
