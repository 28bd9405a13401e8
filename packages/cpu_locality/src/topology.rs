use std::fmt::{self, Display};
use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};

use crate::{CpuId, NumaId};

mod builder;

pub use builder::GroupBuilder;

/// Stable address of a group inside a [`Topology`].
///
/// Indexes are only meaningful for the topology that produced them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupIndex(pub(crate) usize);

impl GroupIndex {
    /// The position of the group in the arena. The root is always at position 0.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// One hardware locality group: the whole host, a NUMA node, a shared cache or a single
/// logical processor.
///
/// Groups are owned by a [`Topology`] and reference their children by [`GroupIndex`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TopologyGroup {
    pub(crate) numa: NumaId,
    pub(crate) cache_level: Option<u32>,
    pub(crate) cache_size: Option<u64>,
    pub(crate) cache_line: Option<u32>,
    pub(crate) cpus: Vec<CpuId>,
    pub(crate) children: Vec<GroupIndex>,
}

impl TopologyGroup {
    /// The NUMA node this group belongs to, or [`NumaId::INVALID`] if the concept does not
    /// apply at this level of the tree.
    #[must_use]
    pub fn numa(&self) -> NumaId {
        self.numa
    }

    /// The cache level (1 = closest to the processor) if this group represents a shared cache.
    #[must_use]
    pub fn cache_level(&self) -> Option<u32> {
        self.cache_level
    }

    /// Size of the cache in bytes, if known.
    #[must_use]
    pub fn cache_size(&self) -> Option<u64> {
        self.cache_size
    }

    /// Size of a cache line in bytes, if known.
    #[must_use]
    pub fn cache_line(&self) -> Option<u32> {
        self.cache_line
    }

    /// Every processor reachable under this group, in the order the leaves appear.
    #[must_use]
    pub fn cpus(&self) -> &[CpuId] {
        &self.cpus
    }

    /// The sub-groups of this group. Empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[GroupIndex] {
        &self.children
    }

    /// Whether this group is a leaf representing exactly one logical processor.
    #[must_use]
    pub fn is_cpu(&self) -> bool {
        self.children.is_empty() && self.cpus.len() == 1
    }

    /// Whether the processor is reachable under this group.
    #[must_use]
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.cpus.contains(&cpu)
    }

    // Picks the n-th processor of the group, negative values counting from the end.
    fn nth_cpu(&self, n: isize) -> Option<CpuId> {
        let index = if n < 0 {
            self.cpus.len().checked_sub(n.unsigned_abs())?
        } else {
            n.unsigned_abs()
        };

        self.cpus.get(index).copied()
    }
}

/// Hierarchical model of the hardware locality groups of a machine.
///
/// The tree goes from the host (root) through NUMA nodes and shared caches down to single
/// processors (leaves). It is stored as an arena of [`TopologyGroup`] values addressed by
/// [`GroupIndex`], so it can be moved and cloned freely without invalidating any index.
///
/// Every topology produced by this package satisfies the following:
///
/// * A leaf has exactly one processor.
/// * The processors of the children of a group are pairwise disjoint and together equal the
///   processors of the group, in the order the children appear.
/// * Cache levels never increase when walking from the root towards a leaf.
///
/// A topology is immutable once built. Obtain one via [`Topology::current()`],
/// [`detect()`][crate::detect] or [`GroupBuilder::build()`].
///
/// # Example
///
/// ```
/// use cpu_locality::Topology;
///
/// let topology = Topology::current();
/// println!("{topology}");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    groups: Vec<TopologyGroup>,
}

static CURRENT: OnceLock<Arc<Topology>> = OnceLock::new();

impl Topology {
    /// The topology of the current machine, probed on first use and shared afterwards.
    ///
    /// The probe is never repeated within a process. Use [`detect()`][crate::detect] if you
    /// need a fresh probe.
    #[must_use]
    pub fn current() -> Arc<Self> {
        Arc::clone(CURRENT.get_or_init(|| Arc::new(crate::detect())))
    }

    pub(crate) fn from_groups(groups: Vec<TopologyGroup>) -> Self {
        debug_assert!(!groups.is_empty(), "a topology always has a root group");

        Self { groups }
    }

    /// The index of the root (host) group.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> GroupIndex {
        GroupIndex(0)
    }

    /// The root (host) group.
    #[must_use]
    pub fn root_group(&self) -> &TopologyGroup {
        self.group(self.root())
    }

    /// Looks up a group by index.
    ///
    /// # Panics
    ///
    /// Panics if the index was not produced by this topology.
    #[must_use]
    pub fn group(&self, index: GroupIndex) -> &TopologyGroup {
        self.groups
            .get(index.0)
            .expect("group index does not belong to this topology")
    }

    /// Every processor in the topology, in discovery order.
    #[must_use]
    pub fn cpus(&self) -> &[CpuId] {
        &self.root_group().cpus
    }

    /// Number of processors in the topology.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpus().len()
    }

    /// Whether the topology contains no processors at all.
    ///
    /// Topologies returned by [`detect()`][crate::detect] are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpus().is_empty()
    }

    /// Number of groups in the topology, including the root and the leaves.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Depth-first pre-order traversal of the whole tree.
    ///
    /// The callback receives the index of each group, the group itself and the path of its
    /// ancestors from the root down to its parent (empty for the root). Returning
    /// [`ControlFlow::Break`] stops the whole traversal, which is then reported by the
    /// return value.
    ///
    /// # Example
    ///
    /// ```
    /// use std::ops::ControlFlow;
    ///
    /// use cpu_locality::Topology;
    ///
    /// let topology = Topology::current();
    /// let mut max_depth = 0;
    ///
    /// let flow = topology.visit(|_, _, path| {
    ///     max_depth = max_depth.max(path.len());
    ///     ControlFlow::Continue(())
    /// });
    /// assert!(flow.is_continue());
    ///
    /// println!("The tree is {max_depth} levels deep");
    /// ```
    pub fn visit<F>(&self, mut f: F) -> ControlFlow<()>
    where
        F: FnMut(GroupIndex, &TopologyGroup, &[GroupIndex]) -> ControlFlow<()>,
    {
        self.visit_from(self.root(), &mut f)
    }

    /// Like [`visit()`][Self::visit] but limited to the subtree under `start`. Paths passed to
    /// the callback start at `start`.
    pub fn visit_from<F>(&self, start: GroupIndex, mut f: F) -> ControlFlow<()>
    where
        F: FnMut(GroupIndex, &TopologyGroup, &[GroupIndex]) -> ControlFlow<()>,
    {
        let mut path = Vec::new();
        self.visit_inner(start, &mut path, &mut f)
    }

    /// Like [`visit()`][Self::visit] but always walks the whole tree.
    pub fn for_each_group<F>(&self, mut f: F)
    where
        F: FnMut(GroupIndex, &TopologyGroup, &[GroupIndex]),
    {
        let mut path = Vec::new();
        self.for_each_inner(self.root(), &mut path, &mut f);
    }

    fn for_each_inner<F>(&self, index: GroupIndex, path: &mut Vec<GroupIndex>, f: &mut F)
    where
        F: FnMut(GroupIndex, &TopologyGroup, &[GroupIndex]),
    {
        let group = self.group(index);
        f(index, group, path);

        path.push(index);
        for &child in &group.children {
            self.for_each_inner(child, path, f);
        }
        path.pop();
    }

    fn visit_inner<F>(
        &self,
        index: GroupIndex,
        path: &mut Vec<GroupIndex>,
        f: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(GroupIndex, &TopologyGroup, &[GroupIndex]) -> ControlFlow<()>,
    {
        let group = self.group(index);
        f(index, group, path)?;

        path.push(index);
        for &child in &group.children {
            self.visit_inner(child, path, f)?;
        }
        path.pop();

        ControlFlow::Continue(())
    }

    /// The first group in pre-order that satisfies the predicate.
    pub fn find<P>(&self, mut predicate: P) -> Option<GroupIndex>
    where
        P: FnMut(&TopologyGroup, &[GroupIndex]) -> bool,
    {
        let mut result = None;

        let flow = self.visit(|index, group, path| {
            if predicate(group, path) {
                result = Some(index);
                return ControlFlow::Break(());
            }

            ControlFlow::Continue(())
        });

        match flow {
            ControlFlow::Break(()) => result,
            ControlFlow::Continue(()) => None,
        }
    }

    /// The cache group at `level` that contains the processor.
    #[must_use]
    pub fn find_cache(&self, cpu: CpuId, level: u32) -> Option<GroupIndex> {
        self.find(|group, _| group.cache_level == Some(level) && group.contains(cpu))
    }

    /// Picks the `n`-th processor of every cache group at `level`, with negative `n` counting
    /// from the end of each group. Groups with fewer processors than required are skipped.
    ///
    /// With `n = 0` and `level = 1` this yields one logical processor per physical core, which
    /// is how simultaneous multithreading is disabled.
    #[must_use]
    pub fn collect_nth_cpu_of_cache_level(&self, n: isize, level: u32) -> Vec<CpuId> {
        // A group nested in another group of the same level shares its processors.
        self.collect_nth_cpu_where(n, |group, path| {
            group.cache_level == Some(level)
                && path
                    .iter()
                    .rev()
                    .find_map(|&ancestor| self.group(ancestor).cache_level)
                    != Some(level)
        })
    }

    /// Picks the `n`-th processor of every NUMA group, with negative `n` counting from the end.
    #[must_use]
    pub fn collect_nth_cpu_of_numa(&self, n: isize) -> Vec<CpuId> {
        // Only the outermost group of each node, nested groups repeat the same node.
        self.collect_nth_cpu_where(n, |group, path| {
            group.numa.is_valid()
                && path.iter().all(|&ancestor| self.group(ancestor).numa != group.numa)
        })
    }

    fn collect_nth_cpu_where<P>(&self, n: isize, mut predicate: P) -> Vec<CpuId>
    where
        P: FnMut(&TopologyGroup, &[GroupIndex]) -> bool,
    {
        let mut result = Vec::new();

        self.for_each_group(|_, group, path| {
            if predicate(group, path) {
                result.extend(group.nth_cpu(n));
            }
        });

        result
    }

    /// Fills in cache sizes and line sizes that the probe could not determine, using
    /// machine-wide defaults per cache level.
    pub(crate) fn fill_missing_cache_geometry<F>(&mut self, defaults: F)
    where
        F: Fn(u32) -> (Option<u64>, Option<u32>),
    {
        for group in &mut self.groups {
            let Some(level) = group.cache_level else {
                continue;
            };

            if group.cache_size.is_some() && group.cache_line.is_some() {
                continue;
            }

            let (size, line) = defaults(level);
            group.cache_size = group.cache_size.or(size);
            group.cache_line = group.cache_line.or(line);
        }
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = Ok(());

        let flow = self.visit(|_, group, path| {
            result = write_group_line(f, group, path.len());

            if result.is_err() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        match flow {
            ControlFlow::Break(()) => result,
            ControlFlow::Continue(()) => Ok(()),
        }
    }
}

fn write_group_line(
    f: &mut fmt::Formatter<'_>,
    group: &TopologyGroup,
    depth: usize,
) -> fmt::Result {
    write!(f, "{:indent$}*", "", indent = depth.saturating_mul(2))?;

    if depth == 0 {
        write!(f, " HOST")?;
    }

    if let Some(level) = group.cache_level {
        write!(
            f,
            " L{level}({}/{})",
            group.cache_size.unwrap_or_default(),
            group.cache_line.unwrap_or_default()
        )?;
    }

    if group.numa.is_valid() {
        write!(f, " numa_id({})", group.numa)?;
    }

    if group.is_cpu() {
        if let Some(cpu) = group.cpus.first() {
            write!(f, " cpu_id({cpu})")?;
        }
    }

    writeln!(f)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Topology: Send, Sync, Clone);

    fn cpu(id: i32) -> CpuId {
        CpuId::new(id)
    }

    // Two packages, each with one L3, two cores with private L2+L1 and two threads per core.
    fn two_packages_smt() -> Topology {
        let core = |first: i32| {
            GroupBuilder::new().cache(2).child(
                GroupBuilder::new()
                    .cache(1)
                    .cpu(cpu(first))
                    .cpu(cpu(first + 4)),
            )
        };

        GroupBuilder::new()
            .child(
                GroupBuilder::new()
                    .numa(NumaId::new(0))
                    .child(GroupBuilder::new().cache(3).child(core(0)).child(core(1))),
            )
            .child(
                GroupBuilder::new()
                    .numa(NumaId::new(1))
                    .child(GroupBuilder::new().cache(3).child(core(2)).child(core(3))),
            )
            .build()
    }

    #[test]
    fn visit_is_preorder_with_ancestor_paths() {
        let topology = two_packages_smt();
        let mut depths = Vec::new();

        let flow = topology.visit(|index, _, path| {
            if index == topology.root() {
                assert!(path.is_empty());
            } else {
                assert_eq!(path.first(), Some(&topology.root()));
            }

            depths.push(path.len());
            ControlFlow::Continue(())
        });

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(depths.len(), topology.group_count());
        // root, numa, L3, L2, L1, cpu, cpu, L2, L1, cpu, cpu, ...
        assert_eq!(&depths[..7], &[0, 1, 2, 3, 4, 5, 5]);
    }

    #[test]
    fn visit_stops_on_break() {
        let topology = two_packages_smt();
        let mut seen = 0;

        let flow = topology.visit(|_, _, _| {
            seen += 1;

            if seen == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(seen, 3);
    }

    #[test]
    fn visit_from_subtree_paths_start_at_start() {
        let topology = two_packages_smt();
        let start = topology.root_group().children().first().copied().unwrap();

        let mut visited = Vec::new();
        let mut leaves = Vec::new();

        let flow = topology.visit_from(start, |index, group, path| {
            if index == start {
                assert!(path.is_empty());
            } else {
                assert_eq!(path.first(), Some(&start));
            }

            if group.is_cpu() {
                leaves.extend_from_slice(group.cpus());
            }

            visited.push(index);
            ControlFlow::Continue(())
        });

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(visited.first(), Some(&start));
        assert!(!visited.contains(&topology.root()));
        // numa, L3, then two cores of L2, L1 and two processors each.
        assert_eq!(visited.len(), 10);
        assert_eq!(leaves, vec![cpu(0), cpu(4), cpu(1), cpu(5)]);
    }

    #[test]
    fn for_each_group_matches_visit_order() {
        let topology = two_packages_smt();

        let mut visited = Vec::new();
        let flow = topology.visit(|index, _, _| {
            visited.push(index);
            ControlFlow::Continue(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));

        let mut walked = Vec::new();
        topology.for_each_group(|index, _, _| walked.push(index));

        assert_eq!(walked, visited);
    }

    #[test]
    fn group_indexes_are_arena_positions() {
        let topology = two_packages_smt();

        assert_eq!(topology.root().get(), 0);

        let mut positions = Vec::new();
        topology.for_each_group(|index, _, _| positions.push(index.get()));

        // Pre-order placement, so positions are assigned in visiting order.
        assert_eq!(positions, (0..topology.group_count()).collect::<Vec<_>>());
    }

    #[test]
    fn find_returns_first_match() {
        let topology = two_packages_smt();

        let numa = topology
            .find(|group, _| group.numa().is_valid())
            .map(|index| topology.group(index).numa());
        assert_eq!(numa, Some(NumaId::new(0)));

        assert!(topology.find(|group, _| group.cpus().len() > 100).is_none());
    }

    #[test]
    fn find_cache_locates_group_by_level() {
        let topology = two_packages_smt();

        let l1 = topology.find_cache(cpu(5), 1).unwrap();
        assert_eq!(topology.group(l1).cpus(), &[cpu(1), cpu(5)]);

        let l3 = topology.find_cache(cpu(6), 3).unwrap();
        assert_eq!(
            topology.group(l3).cpus(),
            &[cpu(2), cpu(6), cpu(3), cpu(7)]
        );

        assert!(topology.find_cache(cpu(6), 4).is_none());
        assert!(topology.find_cache(cpu(99), 1).is_none());
    }

    #[test]
    fn is_cpu_only_for_leaves() {
        let topology = two_packages_smt();

        let mut leaves = 0;
        topology.for_each_group(|_, group, _| {
            if group.is_cpu() {
                leaves += 1;
                assert!(group.children().is_empty());
            } else {
                assert!(!group.children().is_empty());
            }
        });

        assert_eq!(leaves, 8);
    }

    #[test]
    fn collect_nth_cpu_of_cache_level_picks_one_per_group() {
        let topology = two_packages_smt();

        assert_eq!(
            topology.collect_nth_cpu_of_cache_level(0, 1),
            vec![cpu(0), cpu(1), cpu(2), cpu(3)]
        );
        assert_eq!(
            topology.collect_nth_cpu_of_cache_level(-1, 1),
            vec![cpu(4), cpu(5), cpu(6), cpu(7)]
        );
        assert_eq!(
            topology.collect_nth_cpu_of_cache_level(1, 3),
            vec![cpu(4), cpu(6)]
        );

        // Out of range in every group.
        assert!(topology.collect_nth_cpu_of_cache_level(2, 1).is_empty());
        assert!(topology.collect_nth_cpu_of_cache_level(-3, 1).is_empty());
        // No such level.
        assert!(topology.collect_nth_cpu_of_cache_level(0, 7).is_empty());
    }

    #[test]
    fn collect_nth_cpu_of_cache_level_skips_nested_same_level() {
        let topology = GroupBuilder::new()
            .child(
                GroupBuilder::new()
                    .cache(1)
                    .child(GroupBuilder::new().cache(1).cpus([cpu(0), cpu(1)])),
            )
            .child(GroupBuilder::new().cache(1).cpus([cpu(2), cpu(3)]))
            .build();

        assert_eq!(
            topology.collect_nth_cpu_of_cache_level(0, 1),
            vec![cpu(0), cpu(2)]
        );
        assert_eq!(
            topology.collect_nth_cpu_of_cache_level(-1, 1),
            vec![cpu(1), cpu(3)]
        );
    }

    #[test]
    fn collect_nth_cpu_of_numa_picks_one_per_node() {
        let topology = two_packages_smt();

        assert_eq!(topology.collect_nth_cpu_of_numa(0), vec![cpu(0), cpu(2)]);
        // Node 0 holds [0, 4, 1, 5], node 1 holds [2, 6, 3, 7].
        assert_eq!(topology.collect_nth_cpu_of_numa(-1), vec![cpu(5), cpu(7)]);
        assert!(topology.collect_nth_cpu_of_numa(4).is_empty());
    }

    #[test]
    fn display_renders_tree() {
        let topology = GroupBuilder::new()
            .child(
                GroupBuilder::new()
                    .numa(NumaId::new(0))
                    .cache(2)
                    .cache_size(1024 * 1024)
                    .cache_line(64)
                    .cpu(cpu(0))
                    .cpu(cpu(1)),
            )
            .build();

        assert_eq!(
            topology.to_string(),
            "* HOST\n  * L2(1048576/64) numa_id(0)\n    * cpu_id(0)\n    * cpu_id(1)\n"
        );
    }

    #[test]
    fn fill_missing_cache_geometry_keeps_known_values() {
        let mut topology = GroupBuilder::new()
            .child(GroupBuilder::new().cache(2).cache_size(4096).cpu(cpu(0)))
            .child(GroupBuilder::new().cache(2).cpu(cpu(1)))
            .build();

        topology.fill_missing_cache_geometry(|level| {
            assert_eq!(level, 2);
            (Some(8192), Some(128))
        });

        let first = topology.find_cache(cpu(0), 2).unwrap();
        assert_eq!(topology.group(first).cache_size(), Some(4096));
        assert_eq!(topology.group(first).cache_line(), Some(128));

        let second = topology.find_cache(cpu(1), 2).unwrap();
        assert_eq!(topology.group(second).cache_size(), Some(8192));
        assert_eq!(topology.group(second).cache_line(), Some(128));
    }

    #[cfg(not(miri))] // Real topology probing is not supported under Miri.
    #[test]
    fn current_is_shared_and_not_empty() {
        let first = Topology::current();
        let second = Topology::current();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_empty());
    }
}
