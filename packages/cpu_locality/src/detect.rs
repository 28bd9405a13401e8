use crate::pal::{Probe, ProbeFacade};
use crate::{CpuId, GroupBuilder, Topology};

/// Probes the hardware topology of the current machine.
///
/// This always succeeds and always returns a topology with at least one processor. Whatever
/// the operating system does not reveal is left out: if it reveals nothing usable at all, the
/// result is a flat topology of anonymous processors (IDs `0..N`, where `N` is the reported
/// hardware concurrency or 1 if even that is unknown) without any cache or NUMA structure.
///
/// Cache sizes and line sizes the operating system reports per cache are supplemented with
/// machine-wide defaults where available.
///
/// Every call probes the operating system anew, which may take a while on large machines.
/// Prefer [`Topology::current()`], which probes once per process.
///
/// # Example
///
/// ```
/// let topology = cpu_locality::detect();
///
/// assert!(topology.cpu_count() >= 1);
/// ```
#[must_use]
pub fn detect() -> Topology {
    detect_with(&ProbeFacade::target())
}

pub(crate) fn detect_with(probe: &ProbeFacade) -> Topology {
    let mut topology = probe.detect_topology();

    if topology.is_empty() {
        let count = probe.hardware_concurrency().max(1);

        tracing::debug!(count, "no topology information, using flat fallback");

        topology = flat(count);
    }

    topology.fill_missing_cache_geometry(|level| probe.cache_geometry(level));

    tracing::debug!(
        cpu_count = topology.cpu_count(),
        group_count = topology.group_count(),
        "detected topology"
    );

    topology
}

fn flat(count: usize) -> Topology {
    let count = i32::try_from(count).unwrap_or(i32::MAX);

    GroupBuilder::new()
        .cpus((0..count).map(CpuId::new))
        .build()
}
