use std::num::NonZeroUsize;
use std::{io, mem, thread};

use itertools::Itertools;
use libc::cpu_set_t;

use crate::pal::linux::sysfs_values::{
    first_line, parse_byte_count, parse_id_list, parse_int,
};
use crate::pal::linux::{Bindings, BindingsFacade, Filesystem, FilesystemFacade};
use crate::pal::{CacheDescriptor, CacheMap, Probe, numa_tree};
use crate::{CpuId, Error, GroupBuilder, NumaId, Topology};

/// Singleton instance of `BuildTargetProbe`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PROBE: BuildTargetProbe =
    BuildTargetProbe::new(BindingsFacade::target(), FilesystemFacade::target());

// Each processor lists its caches as /sys/devices/system/cpu/cpu*/cache/index0, index1, ...
// No real hardware comes anywhere near this many.
const MAX_CACHE_INDEXES: u32 = 32;

// glibc extensions to sysconf(), not exposed by every libc build.
#[cfg(target_env = "gnu")]
const SC_LEVEL1_DCACHE_SIZE: libc::c_int = 188;
#[cfg(target_env = "gnu")]
const SC_LEVEL1_DCACHE_LINESIZE: libc::c_int = 190;
#[cfg(target_env = "gnu")]
const SC_LEVEL2_CACHE_SIZE: libc::c_int = 191;
#[cfg(target_env = "gnu")]
const SC_LEVEL2_CACHE_LINESIZE: libc::c_int = 193;
#[cfg(target_env = "gnu")]
const SC_LEVEL3_CACHE_SIZE: libc::c_int = 194;
#[cfg(target_env = "gnu")]
const SC_LEVEL3_CACHE_LINESIZE: libc::c_int = 196;

/// The probe that matches the crate's build target.
///
/// You would only use a different probe in unit tests that need to mock the operating system.
/// Even then, whenever possible, unit tests should use the real probe for maximum realism.
#[derive(Debug)]
pub(crate) struct BuildTargetProbe {
    bindings: BindingsFacade,
    fs: FilesystemFacade,
}

impl Probe for BuildTargetProbe {
    fn detect_topology(&self) -> Topology {
        self.describe_hardware().build()
    }

    fn hardware_concurrency(&self) -> usize {
        thread::available_parallelism().map_or_else(
            |_| {
                self.bindings
                    .sysconf(libc::_SC_NPROCESSORS_ONLN)
                    .and_then(|count| usize::try_from(count).ok())
                    .unwrap_or(0)
            },
            NonZeroUsize::get,
        )
    }

    #[cfg(target_env = "gnu")]
    fn cache_geometry(&self, level: u32) -> (Option<u64>, Option<u32>) {
        let (size_name, line_name) = match level {
            1 => (SC_LEVEL1_DCACHE_SIZE, SC_LEVEL1_DCACHE_LINESIZE),
            2 => (SC_LEVEL2_CACHE_SIZE, SC_LEVEL2_CACHE_LINESIZE),
            3 => (SC_LEVEL3_CACHE_SIZE, SC_LEVEL3_CACHE_LINESIZE),
            _ => return (None, None),
        };

        (
            self.bindings
                .sysconf(size_name)
                .and_then(|size| u64::try_from(size).ok()),
            self.bindings
                .sysconf(line_name)
                .and_then(|line| u32::try_from(line).ok()),
        )
    }

    #[cfg(not(target_env = "gnu"))]
    fn cache_geometry(&self, _level: u32) -> (Option<u64>, Option<u32>) {
        (None, None)
    }

    fn bind_current_thread(&self, cpu: CpuId) -> crate::Result<()> {
        let Ok(index) = usize::try_from(cpu.get()) else {
            return Err(Error::InvalidCpu(cpu));
        };

        // TODO: This cannot address giant systems (1024+ processors), we would need to use
        // dynamically allocated CPU sets instead of relying on the fixed-size one in libc.
        if index >= usize::try_from(libc::CPU_SETSIZE).unwrap_or(0) {
            return Err(Error::Affinity {
                cpu,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "processor ID does not fit in a fixed-size CPU set",
                ),
            });
        }

        // SAFETY: All zeroes is a valid cpu_set_t.
        let mut cpu_set: cpu_set_t = unsafe { mem::zeroed() };

        // SAFETY: We verified above that the index is within the bounds of the set.
        unsafe {
            libc::CPU_SET(index, &mut cpu_set);
        }

        self.bindings
            .sched_setaffinity_current(&cpu_set)
            .map_err(|source| Error::Affinity { cpu, source })
    }
}

impl BuildTargetProbe {
    pub(super) const fn new(bindings: BindingsFacade, fs: FilesystemFacade) -> Self {
        Self { bindings, fs }
    }

    // There are two main ways to get topology information on Linux:
    // 1. Use libnuma/hwloc style native libraries.
    // 2. Parse files in the /sys virtual filesystem.
    //
    // We go with the latter, which needs no extra native dependencies. We combine:
    // 1. /sys/devices/system/cpu/online for the set of processors.
    // 2. /sys/devices/system/node/node*/cpulist for the processors in each NUMA node.
    // 3. /sys/devices/system/cpu/cpu*/cache/index*/ for the caches of each processor.
    //
    // The node directory may be missing (WSL, some ARM boards, locked down containers), in which
    // case we fall back to the physical package and core of each processor.
    fn describe_hardware(&self) -> GroupBuilder {
        let Some(cpus) = self.online_cpus() else {
            tracing::debug!("online processor list is unavailable");
            return GroupBuilder::new();
        };

        if let Some(numa_nodes) = self.numa_nodes() {
            let caches = self.caches(&cpus);
            return numa_tree(&cpus, &numa_nodes, &caches);
        }

        tracing::debug!("NUMA information is unavailable, grouping processors by package");
        self.package_tree(&cpus)
    }

    fn online_cpus(&self) -> Option<Vec<CpuId>> {
        let contents = self.fs.get_cpu_online_contents()?;
        let ids = parse_id_list(&contents)?;

        if ids.is_empty() {
            return None;
        }

        Some(ids.into_iter().map(CpuId::from).collect())
    }

    fn numa_nodes(&self) -> Option<Vec<(NumaId, Vec<CpuId>)>> {
        let contents = self.fs.get_numa_node_online_contents()?;
        let node_ids = parse_id_list(&contents)?;

        let nodes = node_ids
            .into_iter()
            .filter_map(|node| {
                let cpus = self
                    .fs
                    .get_numa_node_cpulist_contents(node)
                    .as_deref()
                    .and_then(parse_id_list);

                if cpus.is_none() {
                    tracing::trace!(node, "NUMA node has no usable processor list");
                }

                Some((
                    NumaId::from(node),
                    cpus?.into_iter().map(CpuId::from).collect(),
                ))
            })
            .collect_vec();

        (!nodes.is_empty()).then_some(nodes)
    }

    fn caches(&self, cpus: &[CpuId]) -> CacheMap {
        let mut caches = CacheMap::new();

        for &cpu in cpus {
            let Ok(cpu_index) = u32::try_from(cpu.get()) else {
                continue;
            };

            for cache_index in 0..MAX_CACHE_INDEXES {
                let Some(kind) = self.fs.get_cpu_cache_contents(cpu_index, cache_index, "type")
                else {
                    break;
                };

                // Instruction caches do not hold any data we could share between threads.
                let kind = first_line(&kind).unwrap_or_default();
                if !kind.eq_ignore_ascii_case("data") && !kind.eq_ignore_ascii_case("unified") {
                    continue;
                }

                let read = |attribute: &str| {
                    self.fs
                        .get_cpu_cache_contents(cpu_index, cache_index, attribute)
                };

                let Some(level) = read("level").as_deref().and_then(parse_int) else {
                    tracing::trace!(%cpu, cache_index, "cache has no usable level");
                    continue;
                };

                let shared_cpus = read("shared_cpu_list")
                    .as_deref()
                    .and_then(parse_id_list)
                    .unwrap_or_default()
                    .into_iter()
                    .map(CpuId::from)
                    .collect();

                caches.insert(
                    cpu,
                    CacheDescriptor {
                        level,
                        size: read("size").as_deref().and_then(parse_byte_count),
                        line: read("coherency_line_size").as_deref().and_then(parse_int),
                        shared_cpus,
                    },
                );
            }
        }

        caches
    }

    // Without NUMA information, each physical package stands in for a NUMA node and is assumed
    // to share an L3 cache. Each core is assumed to have its own L2 and L1 caches shared by its
    // hardware threads. Cache geometry is left for the OS-wide defaults to fill in.
    fn package_tree(&self, cpus: &[CpuId]) -> GroupBuilder {
        let topology_value = |cpu: CpuId, attribute: &str| {
            u32::try_from(cpu.get())
                .ok()
                .and_then(|index| self.fs.get_cpu_topology_contents(index, attribute))
                .as_deref()
                .and_then(parse_int)
        };

        let packages = group_in_order(cpus, |&cpu| topology_value(cpu, "physical_package_id"));

        let mut root = GroupBuilder::new();

        for (package, package_cpus) in packages {
            let numa = package.map_or(NumaId::INVALID, NumaId::from);
            let mut package_group = GroupBuilder::new().numa(numa).cache(3);

            for (_, core_cpus) in group_in_order(&package_cpus, |&cpu| {
                topology_value(cpu, "core_id")
            }) {
                let l1 = GroupBuilder::new().cache(1).cpus(core_cpus);
                package_group.push_child(GroupBuilder::new().cache(2).child(l1));
            }

            root.push_child(package_group);
        }

        root
    }
}

// Groups the items by key, with groups and their members in order of first appearance.
fn group_in_order<K, F>(cpus: &[CpuId], mut key: F) -> Vec<(K, Vec<CpuId>)>
where
    K: PartialEq,
    F: FnMut(&CpuId) -> K,
{
    let mut groups: Vec<(K, Vec<CpuId>)> = Vec::new();

    for cpu in cpus {
        let cpu_key = key(cpu);

        match groups.iter_mut().find(|(group_key, _)| *group_key == cpu_key) {
            Some((_, members)) => members.push(*cpu),
            None => groups.push((cpu_key, vec![*cpu])),
        }
    }

    groups
}
