//! Result codes shared by every primitive.

use crate::errno;
use crate::supervisor::SupervisorError;

/// Failure of a primitive operation.
///
/// Internal invariant violations are not represented here; they abort the
/// domain through [`crate::fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("resource busy")]
    Busy,
    #[error("caller does not own the lock")]
    NotOwner,
    #[error("out of memory")]
    OutOfMemory,
    #[error("timed out")]
    TimedOut,
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

pub type ThreadResult<T> = Result<T, ThreadError>;

impl ThreadError {
    /// Conventional error number for the shim.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::Busy => errno::EBUSY,
            Self::NotOwner => errno::EPERM,
            Self::OutOfMemory => errno::ENOMEM,
            Self::TimedOut => errno::ETIMEDOUT,
            Self::Supervisor(_) => errno::EAGAIN,
        }
    }
}

/// Collapses a result into the shim's `0`-or-errno convention.
#[must_use]
pub fn result_errno<T>(result: &ThreadResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorCall;

    #[test]
    fn every_variant_maps_to_a_distinct_errno() {
        let all = [
            ThreadError::InvalidArgument,
            ThreadError::Busy,
            ThreadError::NotOwner,
            ThreadError::OutOfMemory,
            ThreadError::TimedOut,
            ThreadError::Supervisor(SupervisorError::new(SupervisorCall::Wait, 5)),
        ];
        let mut codes: Vec<i32> = all.iter().map(ThreadError::errno).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn success_maps_to_zero() {
        assert_eq!(result_errno(&Ok::<(), ThreadError>(())), 0);
        assert_eq!(
            result_errno(&Err::<(), _>(ThreadError::TimedOut)),
            errno::ETIMEDOUT
        );
    }
}
