use std::fmt::Debug;
use std::fs;

use crate::pal::linux::Filesystem;

/// The virtual filesystem for the real operating system that the build is targeting.
///
/// You would only use different filesystems in PAL unit tests that need to use a mock filesystem.
/// Even then, whenever possible, unit tests should use the real filesystem for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

// Real filesystem bindings are excluded from coverage measurement because:
// 1. They are tested via integration tests running on actual Linux.
// 2. Which files exist depends on the kernel and sandbox of the test system.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Filesystem for BuildTargetFilesystem {
    fn get_cpu_online_contents(&self) -> Option<String> {
        fs::read_to_string("/sys/devices/system/cpu/online").ok()
    }

    fn get_numa_node_online_contents(&self) -> Option<String> {
        fs::read_to_string("/sys/devices/system/node/online").ok()
    }

    fn get_numa_node_cpulist_contents(&self, node_index: u32) -> Option<String> {
        fs::read_to_string(format!("/sys/devices/system/node/node{node_index}/cpulist")).ok()
    }

    fn get_cpu_cache_contents(
        &self,
        cpu_index: u32,
        cache_index: u32,
        attribute: &str,
    ) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{cpu_index}/cache/index{cache_index}/{attribute}"
        ))
        .ok()
    }

    fn get_cpu_topology_contents(&self, cpu_index: u32, attribute: &str) -> Option<String> {
        fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu{cpu_index}/topology/{attribute}"
        ))
        .ok()
    }
}
