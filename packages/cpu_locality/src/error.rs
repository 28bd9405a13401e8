use std::{io, result};

use thiserror::Error;

use crate::CpuId;

/// Errors that can occur when binding threads to processors.
///
/// Topology detection and metrics never fail: missing or malformed data from the operating
/// system degrades the result instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked to bind to [`CpuId::INVALID`].
    #[error("cannot bind to invalid processor ID {0}")]
    InvalidCpu(CpuId),

    /// The operating system refused to bind the current thread to the processor.
    #[error("failed to bind current thread to processor {cpu}")]
    Affinity {
        /// The processor the binding was requested for.
        cpu: CpuId,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// Thread binding is not supported on this platform.
    #[error("thread binding is not supported on this platform")]
    Unsupported,
}

/// A specialized `Result` type for thread binding operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn affinity_exposes_os_error_as_source() {
        let error = Error::Affinity {
            cpu: CpuId::new(3),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };

        assert_eq!(
            error.to_string(),
            "failed to bind current thread to processor 3"
        );
        assert!(error.source().is_some());
    }

    #[test]
    fn invalid_cpu_mentions_id() {
        assert_eq!(
            Error::InvalidCpu(CpuId::INVALID).to_string(),
            "cannot bind to invalid processor ID -1"
        );
    }
}
