use std::mem::offset_of;
use std::num::NonZeroUsize;
use std::{io, thread};

use windows::Win32::Foundation::ERROR_INSUFFICIENT_BUFFER;
use windows::Win32::System::SystemInformation::{
    CacheData, CacheUnified, GROUP_AFFINITY, RelationAll, RelationCache, RelationNumaNode,
    RelationProcessorCore, SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::core::HRESULT;

use crate::pal::windows::{Bindings, BindingsFacade};
use crate::pal::{CacheDescriptor, CacheMap, Probe, numa_tree};
use crate::{CpuId, Error, GroupBuilder, NumaId, Topology};

/// Singleton instance of `BuildTargetProbe`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PROBE: BuildTargetProbe =
    BuildTargetProbe::new(BindingsFacade::target());

// Processor groups are always 64-sized, even if the mask type is narrower on 32-bit targets.
const PROCESSORS_PER_GROUP: u32 = 64;

/// The probe that matches the crate's build target.
///
/// You would only use a different probe in unit tests that need to mock the operating system.
/// Even then, whenever possible, unit tests should use the real probe for maximum realism.
#[derive(Debug)]
pub(crate) struct BuildTargetProbe {
    bindings: BindingsFacade,
}

impl Probe for BuildTargetProbe {
    fn detect_topology(&self) -> Topology {
        let Some(info) = self.get_logical_processor_information() else {
            return GroupBuilder::new().build();
        };

        numa_tree(&info.cpus, &info.numa_nodes, &info.caches).build()
    }

    fn hardware_concurrency(&self) -> usize {
        thread::available_parallelism().map_or(0, NonZeroUsize::get)
    }

    fn cache_geometry(&self, _level: u32) -> (Option<u64>, Option<u32>) {
        // Windows reports the geometry with every cache record, so there is nothing to add.
        (None, None)
    }

    #[expect(
        clippy::integer_division,
        reason = "processor groups are addressed by quotient and remainder"
    )]
    fn bind_current_thread(&self, cpu: CpuId) -> crate::Result<()> {
        let Ok(id) = u32::try_from(cpu.get()) else {
            return Err(Error::InvalidCpu(cpu));
        };

        let Ok(group) = u16::try_from(id / PROCESSORS_PER_GROUP) else {
            return Err(Error::Affinity {
                cpu,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "processor ID is beyond the last possible processor group",
                ),
            });
        };

        let index_in_group = id % PROCESSORS_PER_GROUP;

        let Some(mask) = 1_usize.checked_shl(index_in_group) else {
            // Only possible on 32-bit targets, which never see the upper half of a group.
            return Err(Error::Affinity {
                cpu,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "processor is not addressable by this process",
                ),
            });
        };

        let affinity = GROUP_AFFINITY {
            Mask: mask,
            Group: group,
            ..Default::default()
        };

        self.bindings
            .set_current_thread_group_affinity(&affinity)
            .map_err(|e| Error::Affinity {
                cpu,
                source: io::Error::other(e),
            })
    }
}

// Everything we extract from the logical processor information records.
#[derive(Debug, Default)]
struct ProcessorInformation {
    cpus: Vec<CpuId>,
    numa_nodes: Vec<(NumaId, Vec<CpuId>)>,
    caches: CacheMap,
}

impl BuildTargetProbe {
    pub(super) const fn new(bindings: BindingsFacade) -> Self {
        Self { bindings }
    }

    fn get_logical_processor_information(&self) -> Option<ProcessorInformation> {
        let (buffer, length) = self.get_logical_processor_information_raw()?;

        let mut info = ProcessorInformation::default();

        // The structures returned by the OS are dynamically sized so we only have various
        // disgusting options for parsing/processing them. Pointer wrangling is the most readable.
        let start: *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX = buffer.as_ptr().cast();

        // SAFETY: The OS told us it wrote this many bytes, all within the buffer.
        let end = unsafe { start.byte_add(length) };

        let mut next = start;

        while next < end {
            let current = next;

            // SAFETY: We just process the data in the form the OS promises to give it to us.
            let record = unsafe { &*current };

            if record.Size == 0 {
                tracing::debug!("logical processor information record of size 0, ignoring rest");
                break;
            }

            // SAFETY: We just process the data in the form the OS promises to give it to us.
            next = unsafe { next.byte_add(record.Size as usize) };

            if record.Relationship == RelationProcessorCore {
                // SAFETY: The relationship tells us which union member is present.
                let details = unsafe { &record.Anonymous.Processor };

                // API docs: If the PROCESSOR_RELATIONSHIP structure represents a processor core,
                // the GroupCount member is always 1.
                info.cpus.extend(cpus_in_mask(&details.GroupMask[0]));
            } else if record.Relationship == RelationNumaNode {
                // SAFETY: The relationship tells us which union member is present.
                let details = unsafe { &record.Anonymous.NumaNode };

                // SAFETY: RelationNumaNode guarantees that this union member is present and
                // that the mask array has GroupCount elements (at least 1).
                let masks = unsafe {
                    group_masks(
                        current,
                        offset_of!(
                            SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
                            Anonymous.NumaNode.Anonymous.GroupMask
                        ),
                        details.GroupCount,
                    )
                };

                let node_cpus = masks.iter().flat_map(cpus_in_mask).collect();

                info.numa_nodes
                    .push((NumaId::from(details.NodeNumber), node_cpus));
            } else if record.Relationship == RelationCache {
                // SAFETY: The relationship tells us which union member is present.
                let details = unsafe { &record.Anonymous.Cache };

                // Instruction caches do not hold any data we could share between threads.
                if details.Type != CacheData && details.Type != CacheUnified {
                    continue;
                }

                // SAFETY: RelationCache guarantees that this union member is present and
                // that the mask array has GroupCount elements (at least 1).
                let masks = unsafe {
                    group_masks(
                        current,
                        offset_of!(
                            SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
                            Anonymous.Cache.Anonymous.GroupMask
                        ),
                        details.GroupCount,
                    )
                };

                let shared_cpus: Vec<CpuId> = masks.iter().flat_map(cpus_in_mask).collect();

                let cache = CacheDescriptor {
                    level: u32::from(details.Level),
                    size: (details.CacheSize > 0).then_some(u64::from(details.CacheSize)),
                    line: (details.LineSize > 0).then_some(u32::from(details.LineSize)),
                    shared_cpus,
                };

                for &cpu in &cache.shared_cpus {
                    info.caches.insert(cpu, cache.clone());
                }
            }
        }

        if info.cpus.is_empty() {
            tracing::debug!("logical processor information lists no processors");
            return None;
        }

        Some(info)
    }

    // Returns the records in a u64-aligned buffer, plus the number of bytes written to it.
    fn get_logical_processor_information_raw(&self) -> Option<(Vec<u64>, usize)> {
        loop {
            let mut required_length: u32 = 0;

            // SAFETY: Pointers must outlive the call (true - local variable lives beyond call).
            let probe_result = unsafe {
                self.bindings.get_logical_processor_information_ex(
                    RelationAll,
                    None,
                    &raw mut required_length,
                )
            };

            match probe_result {
                Err(e) if e.code() == HRESULT::from_win32(ERROR_INSUFFICIENT_BUFFER.0) => {}
                other => {
                    tracing::debug!(
                        ?other,
                        "GetLogicalProcessorInformationEx size probe failed"
                    );
                    return None;
                }
            }

            let word_count = (required_length as usize).div_ceil(size_of::<u64>());
            let mut buffer = vec![0_u64; word_count];
            let mut final_length = required_length;

            // SAFETY: Pointers must outlive the call (true - local variables live beyond call).
            // The buffer is at least `required_length` bytes and u64 alignment is enough for
            // the records.
            let real_result = unsafe {
                self.bindings.get_logical_processor_information_ex(
                    RelationAll,
                    Some(buffer.as_mut_ptr().cast()),
                    &raw mut final_length,
                )
            };

            // In theory, it could still have failed with "insufficient buffer" because the set of
            // processors available to us can change at any time. Super unlikely but let's be safe.
            if let Err(e) = real_result {
                if e.code() == HRESULT::from_win32(ERROR_INSUFFICIENT_BUFFER.0) {
                    // Well, we just have to try again then.
                    continue;
                }

                tracing::debug!(error = %e, "GetLogicalProcessorInformationEx failed");
                return None;
            }

            let length = (final_length as usize).min(buffer.len() * size_of::<u64>());

            return Some((buffer, length));
        }
    }
}

// Reads the variable-length GROUP_AFFINITY array that ends a NUMA node or cache record.
//
// In the struct definition, this is a 1-element array because Rust has no notion of
// dynamic-size arrays. We use pointer arithmetic from the record pointer to access
// the real array elements.
//
// SAFETY: `record` must point to a complete record whose array at `offset` holds `count`
// elements. A count of 0 (older Windows versions) means the array holds one element.
unsafe fn group_masks(
    record: *const SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
    offset: usize,
    count: u16,
) -> Vec<GROUP_AFFINITY> {
    // SAFETY: Forwarding safety requirements to caller.
    let first = unsafe { record.byte_add(offset).cast::<GROUP_AFFINITY>() };

    (0..usize::from(count.max(1)))
        // SAFETY: The OS promises us that this array contains `count` elements.
        .map(|index| unsafe { first.add(index).read_unaligned() })
        .collect()
}

// Every processor in the mask, as IDs that are unique across processor groups.
fn cpus_in_mask(affinity: &GROUP_AFFINITY) -> Vec<CpuId> {
    let group_start = u32::from(affinity.Group) * PROCESSORS_PER_GROUP;

    // Minimum effort approach for WOW64 support - we only see the first 32 in a group.
    (0..usize::BITS.min(PROCESSORS_PER_GROUP))
        .filter(|index_in_group| affinity.Mask & (1 << index_in_group) != 0)
        .map(|index_in_group| CpuId::from(group_start + index_in_group))
        .collect()
}
