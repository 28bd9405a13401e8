use std::num::NonZeroUsize;
use std::thread;

use crate::pal::Probe;
use crate::{CpuId, Error, GroupBuilder, Topology};

/// Fallback probe for operating systems without native support.
///
/// It knows nothing about caches or NUMA nodes and cannot bind threads. The only thing it
/// reports is the processor count from `std::thread::available_parallelism()`, which is enough
/// for the flat fallback topology.
#[derive(Debug)]
pub(crate) struct BuildTargetProbe;

/// Singleton instance of `BuildTargetProbe`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PROBE: BuildTargetProbe = BuildTargetProbe;

impl Probe for BuildTargetProbe {
    fn detect_topology(&self) -> Topology {
        GroupBuilder::new().build()
    }

    fn hardware_concurrency(&self) -> usize {
        thread::available_parallelism().map_or(0, NonZeroUsize::get)
    }

    fn cache_geometry(&self, _level: u32) -> (Option<u64>, Option<u32>) {
        (None, None)
    }

    fn bind_current_thread(&self, _cpu: CpuId) -> crate::Result<()> {
        Err(Error::Unsupported)
    }
}
