use thiserror::Error;

/// Errors that can occur when accessing the instance held by a cell.
///
/// Both variants are terminal for the access attempt that produced them. The cell itself
/// remains in a coherent state and later access attempts may succeed, depending on the
/// variant and the policies in play.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The allocation strategy could not obtain storage for a new instance.
    ///
    /// The slot remains empty after this error, so a later access attempt will retry
    /// the allocation from a clean state.
    #[error("allocation of {size} bytes for the instance was refused by the allocator")]
    AllocationExhausted {
        /// Size in bytes of the storage that was requested.
        size: usize,
    },

    /// The instance was torn down and the cell's lifecycle does not permit recreation.
    ///
    /// Returned on every access attempt made after teardown when the cell uses the
    /// [`Standard`][crate::Standard] lifecycle.
    #[error("the instance was torn down and the lifecycle does not permit recreation")]
    TornDown,
}

/// A specialized `Result` type for cell access operations, returning the crate's
/// [`AccessError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, AccessError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AccessError: Send, Sync, Debug);

    #[test]
    fn exhaustion_reports_requested_size() {
        let error = AccessError::AllocationExhausted { size: 64 };

        assert!(error.to_string().contains("64"));
    }

    #[test]
    fn torn_down_names_the_condition() {
        let error = AccessError::TornDown;

        assert!(error.to_string().contains("torn down"));
    }
}
