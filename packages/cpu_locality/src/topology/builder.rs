use foldhash::{HashSet, HashSetExt};

use crate::topology::{GroupIndex, Topology, TopologyGroup};
use crate::{CpuId, NumaId};

/// Builds a [`Topology`] from an owned tree of groups.
///
/// Every probe backend describes the hardware it finds with this type and callers can use it
/// to describe synthetic hardware (e.g. in tests or to model a machine other than the current
/// one). A group is either a leaf representing one processor (created via [`leaf()`][1] or
/// appended via [`cpu()`][2]) or an internal group whose processors are those of its children.
///
/// [`build()`][3] normalizes the tree so it always satisfies the [`Topology`] invariants:
///
/// * Leaves with an invalid processor ID are dropped.
/// * A processor that appears in more than one leaf is kept only in the first one.
/// * Internal groups left without any processors are dropped.
/// * A cache level larger than the level of an enclosing cache group is discarded.
///
/// # Example
///
/// ```
/// use cpu_locality::{CpuId, GroupBuilder, NumaId};
///
/// // Two NUMA nodes with two processors each, no cache information.
/// let topology = GroupBuilder::new()
///     .child(
///         GroupBuilder::new()
///             .numa(NumaId::new(0))
///             .cpus([CpuId::new(0), CpuId::new(1)]),
///     )
///     .child(
///         GroupBuilder::new()
///             .numa(NumaId::new(1))
///             .cpus([CpuId::new(2), CpuId::new(3)]),
///     )
///     .build();
///
/// assert_eq!(topology.cpu_count(), 4);
/// ```
///
/// [1]: Self::leaf
/// [2]: Self::cpu
/// [3]: Self::build
#[derive(Clone, Debug, Default)]
pub struct GroupBuilder {
    numa: NumaId,
    cache_level: Option<u32>,
    cache_size: Option<u64>,
    cache_line: Option<u32>,

    // Set only for leaves.
    cpu: Option<CpuId>,

    children: Vec<Self>,
}

impl GroupBuilder {
    /// Creates an internal group without NUMA or cache attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a leaf group representing a single processor.
    #[must_use]
    pub fn leaf(cpu: CpuId) -> Self {
        Self {
            cpu: Some(cpu),
            ..Self::default()
        }
    }

    /// Marks the group as belonging to a NUMA node.
    #[must_use]
    pub fn numa(mut self, numa: NumaId) -> Self {
        self.numa = numa;
        self
    }

    /// Marks the group as a cache shared by its processors. Level 0 means "not a cache".
    #[must_use]
    pub fn cache(mut self, level: u32) -> Self {
        self.cache_level = (level > 0).then_some(level);
        self
    }

    /// Sets the size of the cache in bytes.
    #[must_use]
    pub fn cache_size(mut self, bytes: u64) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    /// Sets the cache line size in bytes.
    #[must_use]
    pub fn cache_line(mut self, bytes: u32) -> Self {
        self.cache_line = Some(bytes);
        self
    }

    /// Appends a sub-group.
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Appends a leaf for the processor.
    #[must_use]
    pub fn cpu(self, cpu: CpuId) -> Self {
        self.child(Self::leaf(cpu))
    }

    /// Appends a leaf for each processor.
    #[must_use]
    pub fn cpus<I>(mut self, cpus: I) -> Self
    where
        I: IntoIterator<Item = CpuId>,
    {
        self.children.extend(cpus.into_iter().map(Self::leaf));
        self
    }

    pub(crate) fn set_cache_geometry(&mut self, size: Option<u64>, line: Option<u32>) {
        self.cache_size = size;
        self.cache_line = line;
    }

    pub(crate) fn push_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// Builds the topology, treating this group as the root.
    ///
    /// The result is empty (see [`Topology::is_empty()`]) if no valid processor was described.
    #[must_use]
    pub fn build(self) -> Topology {
        let mut seen = HashSet::new();

        let Some(root) = self.prune(&mut seen, None) else {
            return Topology::from_groups(vec![TopologyGroup::default()]);
        };

        let mut groups = Vec::new();
        root.flatten(&mut groups);

        Topology::from_groups(groups)
    }

    // Drops everything that would violate the topology invariants and computes the processor
    // list of every remaining group.
    fn prune(self, seen: &mut HashSet<CpuId>, enclosing_level: Option<u32>) -> Option<Pruned> {
        let mut group = TopologyGroup {
            numa: self.numa,
            cache_level: self.cache_level,
            cache_size: self.cache_size,
            cache_line: self.cache_line,
            cpus: Vec::new(),
            children: Vec::new(),
        };

        if let (Some(level), Some(enclosing)) = (group.cache_level, enclosing_level) {
            if level > enclosing {
                tracing::debug!(
                    level,
                    enclosing,
                    "discarding cache level larger than that of an enclosing cache"
                );

                group.cache_level = None;
                group.cache_size = None;
                group.cache_line = None;
            }
        }

        if let Some(cpu) = self.cpu {
            debug_assert!(self.children.is_empty(), "a leaf cannot have children");

            if !cpu.is_valid() || !seen.insert(cpu) {
                return None;
            }

            group.cpus.push(cpu);

            return Some(Pruned {
                group,
                children: Vec::new(),
            });
        }

        let child_ceiling = group.cache_level.or(enclosing_level);

        let children: Vec<Pruned> = self
            .children
            .into_iter()
            .filter_map(|child| child.prune(seen, child_ceiling))
            .collect();

        if children.is_empty() {
            return None;
        }

        group.cpus = children
            .iter()
            .flat_map(|child| child.group.cpus.iter().copied())
            .collect();

        Some(Pruned { group, children })
    }
}

// A group that passed validation, with its children not yet placed in the arena.
struct Pruned {
    group: TopologyGroup,
    children: Vec<Self>,
}

impl Pruned {
    // Pre-order placement, so the root always lands at index 0.
    fn flatten(self, groups: &mut Vec<TopologyGroup>) -> GroupIndex {
        let index = GroupIndex(groups.len());
        groups.push(self.group);

        let child_indexes: Vec<GroupIndex> = self
            .children
            .into_iter()
            .map(|child| child.flatten(groups))
            .collect();

        groups
            .get_mut(index.0)
            .expect("we just pushed this group")
            .children = child_indexes;

        index
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn cpu(id: i32) -> CpuId {
        CpuId::new(id)
    }

    // Verifies the leaf and partition invariants on every group.
    fn assert_invariants(topology: &Topology) {
        topology.for_each_group(|_, group, path| {
            if group.children().is_empty() {
                assert_eq!(group.cpus().len(), 1, "leaf must have exactly one processor");
            } else {
                let from_children: Vec<CpuId> = group
                    .children()
                    .iter()
                    .flat_map(|&child| topology.group(child).cpus().iter().copied())
                    .collect();
                assert_eq!(from_children, group.cpus());
            }

            let enclosing = path
                .iter()
                .filter_map(|&ancestor| topology.group(ancestor).cache_level())
                .min();
            if let (Some(level), Some(enclosing)) = (group.cache_level(), enclosing) {
                assert!(level <= enclosing);
            }
        });
    }

    #[test]
    fn root_collects_children_in_order() {
        let topology = GroupBuilder::new()
            .child(GroupBuilder::new().cpus([cpu(3), cpu(1)]))
            .child(GroupBuilder::new().cpus([cpu(0), cpu(2)]))
            .build();

        assert_eq!(topology.cpus(), &[cpu(3), cpu(1), cpu(0), cpu(2)]);
        assert_eq!(topology.group_count(), 7);
        assert_invariants(&topology);
    }

    #[test]
    fn duplicate_processors_are_kept_once() {
        let topology = GroupBuilder::new()
            .child(GroupBuilder::new().cpus([cpu(0), cpu(1)]))
            .child(GroupBuilder::new().cpus([cpu(1), cpu(2)]))
            .build();

        assert_eq!(topology.cpus(), &[cpu(0), cpu(1), cpu(2)]);
        assert_invariants(&topology);
    }

    #[test]
    fn empty_groups_and_invalid_processors_are_dropped() {
        let topology = GroupBuilder::new()
            .child(GroupBuilder::new().numa(NumaId::new(0)))
            .child(GroupBuilder::new().cpu(CpuId::INVALID))
            .child(GroupBuilder::new().numa(NumaId::new(1)).cpu(cpu(4)))
            .build();

        assert_eq!(topology.cpus(), &[cpu(4)]);
        assert_eq!(topology.root_group().children().len(), 1);
        assert_invariants(&topology);
    }

    #[test]
    fn nothing_valid_is_empty() {
        let topology = GroupBuilder::new()
            .child(GroupBuilder::new().numa(NumaId::new(0)))
            .build();

        assert!(topology.is_empty());
        assert_eq!(topology.group_count(), 1);
    }

    #[test]
    fn increasing_cache_level_is_discarded() {
        let topology = GroupBuilder::new()
            .child(
                GroupBuilder::new()
                    .cache(2)
                    .child(GroupBuilder::new().cache(3).cache_size(999).cpu(cpu(0))),
            )
            .build();

        let inner = topology.root_group().children()[0];
        let inner = topology.group(inner).children()[0];
        assert_eq!(topology.group(inner).cache_level(), None);
        assert_eq!(topology.group(inner).cache_size(), None);
        assert_invariants(&topology);
    }

    #[test]
    fn cache_zero_is_not_a_cache() {
        let topology = GroupBuilder::new()
            .child(GroupBuilder::new().cache(0).cpu(cpu(0)))
            .build();

        let child = topology.root_group().children()[0];
        assert_eq!(topology.group(child).cache_level(), None);
    }
}
