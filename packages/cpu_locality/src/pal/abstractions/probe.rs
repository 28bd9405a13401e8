use std::fmt::Debug;

use crate::{CpuId, Topology};

/// Everything the package needs from the operating system.
///
/// All methods are synchronous and may block on OS calls or virtual filesystem reads. None of
/// them fail because of missing or malformed OS data: absent information is reported as such
/// and the caller decides how to degrade.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Probe: Debug + Send + Sync + 'static {
    /// Builds the topology from whatever the operating system exposes.
    ///
    /// The result is empty if the operating system exposes nothing usable.
    fn detect_topology(&self) -> Topology;

    /// The number of logical processors the runtime environment reports, 0 if unknown.
    fn hardware_concurrency(&self) -> usize;

    /// Machine-wide size and line size in bytes of caches at the given level, where known.
    fn cache_geometry(&self, level: u32) -> (Option<u64>, Option<u32>);

    /// Restricts the current thread to the given (valid) processor.
    fn bind_current_thread(&self, cpu: CpuId) -> crate::Result<()>;
}
