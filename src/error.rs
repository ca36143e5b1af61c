/*
 * @file error.rs
 * @author Mike Hamburg
 * @copyright 2020-2022 Rambus Inc.
 *
 * Status results for the uniform map engine.
 */

use std::collections::TryReserveError;

/// Failure results for building uniform maps.
///
/// Every fallible operation in this crate reports through this enum;
/// queries are total and never fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A parameter is outside the supported range.
    ///
    /// Returned when the requested value width is zero or more than 64
    /// bits, or when a requested capacity cannot map to a usable block
    /// count.
    #[error("parameter out of range for uniform map construction")]
    InvalidParameter,

    /// Backing storage could not be obtained.
    ///
    /// No partial state is left behind: the operation that failed did
    /// not publish anything.
    #[error("failed to allocate storage for uniform map construction")]
    AllocationFailure,

    /// The builder's row arena is full, or the builder was consumed by
    /// a solve and has not been reset.
    #[error("builder has no free row slots")]
    CapacityExceeded,

    /// The placement structure for this salt and key set is
    /// rank-deficient, so no solved array exists.
    ///
    /// This is an expected, recoverable outcome: construction is
    /// probabilistic. Retry with a fresh salt, or provision more
    /// blocks. It is not a bug in the caller or the engine.
    #[error("placement structure is rank-deficient; retry with a new salt or more blocks")]
    ConstructionUnsolvable,
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::AllocationFailure
    }
}
