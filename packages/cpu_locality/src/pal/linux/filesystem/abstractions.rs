#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;

/// Linux has this funny notion of exposing various OS APIs as a virtual filesystem. This trait
/// abstracts this virtual filesystem to allow it to be mocked.
///
/// The scope of this trait is limited to only the virtual filesystem exposed by the OS. We do not
/// expect to do "real" file I/O in this layer. All I/O is synchronous and blocking because we
/// expect it to hit a fast path in the OS, given the data is never on a real storage device.
///
/// Every file is optional. Sandboxes and containers routinely hide parts of /sys, so a missing
/// file is `None` and never a failure.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Filesystem: Debug + Send + Sync + 'static {
    /// Gets the contents of the /sys/devices/system/cpu/online file.
    ///
    /// This is a cpulist format file ("0,1,2-4,5-10:2" style list).
    fn get_cpu_online_contents(&self) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/node/online file.
    ///
    /// This is a cpulist format file listing NUMA node IDs. It is absent on kernels without
    /// NUMA support and inside many sandboxes.
    fn get_numa_node_online_contents(&self) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/node/node{}/cpulist file.
    ///
    /// This is a cpulist format file.
    fn get_numa_node_cpulist_contents(&self, node_index: u32) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/cache/index{}/{attribute} file.
    ///
    /// The attributes we use are `level`, `type`, `size` (e.g. "32K"), `coherency_line_size`
    /// and `shared_cpu_list` (cpulist format).
    fn get_cpu_cache_contents(
        &self,
        cpu_index: u32,
        cache_index: u32,
        attribute: &str,
    ) -> Option<String>;

    /// Gets the contents of the /sys/devices/system/cpu/cpu{}/topology/{attribute} file.
    ///
    /// The attributes we use are `physical_package_id` and `core_id`, both single integers.
    fn get_cpu_topology_contents(&self, cpu_index: u32, attribute: &str) -> Option<String>;
}
