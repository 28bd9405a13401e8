//! Synthetic topologies for testing.
//!
//! These describe hardware other than the current machine, so code that consumes a
//! [`Topology`] or a [`Platform`][crate::Platform] can be tested against NUMA and SMT layouts
//! that the test machine does not have.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! # Example
//!
//! ```
//! use std::num::NonZero;
//! use std::sync::Arc;
//!
//! use cpu_locality::Platform;
//! use cpu_locality::fake;
//!
//! // 2 NUMA nodes with 8 cores each and 2 threads per core.
//! let topology = fake::uniform(
//!     NonZero::new(2).unwrap(),
//!     NonZero::new(8).unwrap(),
//!     NonZero::new(2).unwrap(),
//! );
//!
//! let mut platform = Platform::new(Arc::new(topology));
//! assert_eq!(platform.cpu_count(), 32);
//!
//! platform.disable_smt();
//! assert_eq!(platform.cpu_count(), 16);
//! ```
//!
//! For any other shape, describe the hardware with [`GroupBuilder`].

use std::num::NonZero;

use crate::{CpuId, GroupBuilder, NumaId, Topology};

/// Size of the level 1 data cache of every core in a [`uniform()`] topology.
pub const L1_SIZE: u64 = 48 * 1024;

/// Size of the level 2 cache of every core in a [`uniform()`] topology.
pub const L2_SIZE: u64 = 1024 * 1024;

/// Size of the level 3 cache of every NUMA node in a [`uniform()`] topology.
pub const L3_SIZE: u64 = 32 * 1024 * 1024;

/// Cache line size of every cache in a [`uniform()`] topology.
pub const CACHE_LINE: u32 = 64;

/// A machine where every NUMA node has one shared level 3 cache and the same number of cores,
/// each core with private level 2 and level 1 caches and the same number of hardware threads.
///
/// Processor IDs are numbered the way Linux typically numbers them: first thread of every core
/// in order, then the second thread of every core and so on. With 2 nodes, 2 cores per node and
/// 2 threads per core, node 0 holds cores `[0, 4]` and `[1, 5]` while node 1 holds `[2, 6]` and
/// `[3, 7]`.
///
/// # Panics
///
/// Panics if the processor count does not fit in an `i32`.
#[must_use]
pub fn uniform(
    numa_nodes: NonZero<usize>,
    cores_per_node: NonZero<usize>,
    threads_per_core: NonZero<usize>,
) -> Topology {
    let total_cores = numa_nodes
        .checked_mul(cores_per_node)
        .expect("core count overflows usize");

    let mut root = GroupBuilder::new();

    for node in 0..numa_nodes.get() {
        let mut l3 = GroupBuilder::new()
            .cache(3)
            .cache_size(L3_SIZE)
            .cache_line(CACHE_LINE);

        for core in 0..cores_per_node.get() {
            let core_index = node
                .checked_mul(cores_per_node.get())
                .and_then(|first| first.checked_add(core))
                .expect("core index is below the core count");

            let threads = (0..threads_per_core.get()).map(|thread| {
                thread
                    .checked_mul(total_cores.get())
                    .and_then(|first| first.checked_add(core_index))
                    .and_then(|id| i32::try_from(id).ok())
                    .map(CpuId::new)
                    .expect("processor count fits in i32")
            });

            let l1 = GroupBuilder::new()
                .cache(1)
                .cache_size(L1_SIZE)
                .cache_line(CACHE_LINE)
                .cpus(threads);

            let l2 = GroupBuilder::new()
                .cache(2)
                .cache_size(L2_SIZE)
                .cache_line(CACHE_LINE)
                .child(l1);

            l3 = l3.child(l2);
        }

        let numa = i32::try_from(node)
            .map(NumaId::new)
            .expect("NUMA node count fits in i32");

        root = root.child(GroupBuilder::new().numa(numa).child(l3));
    }

    root.build()
}
