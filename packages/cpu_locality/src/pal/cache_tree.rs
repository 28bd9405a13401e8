use foldhash::{HashMap, HashMapExt, HashSet, HashSetExt};

use crate::{CpuId, GroupBuilder, NumaId};

/// One cache as seen from one of the processors that use it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CacheDescriptor {
    pub(crate) level: u32,
    pub(crate) size: Option<u64>,
    pub(crate) line: Option<u32>,

    // Every processor sharing this cache, including the one it was reported for.
    pub(crate) shared_cpus: Vec<CpuId>,
}

/// Per-processor cache data, as reported by the operating system.
///
/// The operating system describes caches from the point of view of each processor ("this
/// processor has an L2 cache shared with these other processors"). This type turns that flat
/// data into nested cache groups.
#[derive(Debug, Default)]
pub(crate) struct CacheMap {
    caches: HashMap<CpuId, Vec<CacheDescriptor>>,
}

impl CacheMap {
    pub(crate) fn new() -> Self {
        Self {
            caches: HashMap::new(),
        }
    }

    /// Records a cache for the processor. Only the first cache of each level is kept.
    pub(crate) fn insert(&mut self, cpu: CpuId, cache: CacheDescriptor) {
        if cache.level == 0 {
            return;
        }

        let caches = self.caches.entry(cpu).or_default();

        if caches.iter().any(|existing| existing.level == cache.level) {
            return;
        }

        caches.push(cache);
    }

    fn get(&self, cpu: CpuId, level: u32) -> Option<&CacheDescriptor> {
        self.caches
            .get(&cpu)?
            .iter()
            .find(|cache| cache.level == level)
    }

    /// The largest cache level known for any of the processors, 0 if none.
    pub(crate) fn max_level(&self, cpus: &[CpuId]) -> u32 {
        cpus.iter()
            .filter_map(|cpu| self.caches.get(cpu))
            .flatten()
            .map(|cache| cache.level)
            .max()
            .unwrap_or(0)
    }

    /// Groups the processors by the caches they share, starting at `level` and nesting finer
    /// levels inside, down to one leaf per processor.
    ///
    /// Sharing sets are restricted to `cpus` and each processor is claimed by the first group
    /// (in `cpus` order) that contains it. A processor without a cache at some level skips
    /// that level on its own.
    pub(crate) fn nest(&self, cpus: &[CpuId], level: u32) -> Vec<GroupBuilder> {
        if level == 0 {
            return cpus.iter().copied().map(GroupBuilder::leaf).collect();
        }

        let mut claimed = HashSet::with_capacity(cpus.len());
        let mut groups = Vec::new();

        for &cpu in cpus {
            if claimed.contains(&cpu) {
                continue;
            }

            let Some(cache) = self.get(cpu, level) else {
                tracing::trace!(%cpu, level, "no cache data at this level");

                claimed.insert(cpu);
                groups.extend(self.nest(&[cpu], level.saturating_sub(1)));
                continue;
            };

            let members: Vec<CpuId> = cpus
                .iter()
                .copied()
                .filter(|candidate| {
                    !claimed.contains(candidate)
                        && (*candidate == cpu || cache.shared_cpus.contains(candidate))
                })
                .collect();

            claimed.extend(members.iter().copied());

            let mut group = GroupBuilder::new().cache(level);
            group.set_cache_geometry(cache.size, cache.line);

            for child in self.nest(&members, level.saturating_sub(1)) {
                group.push_child(child);
            }

            groups.push(group);
        }

        groups
    }
}

/// Builds the root group for a machine with the given NUMA nodes.
///
/// Each NUMA node becomes a non-cache group whose children are the coarsest shared caches
/// restricted to the processors of that node. Processors that belong to no NUMA node are
/// placed in one extra group without NUMA attribution. If there are no NUMA nodes at all, the
/// cache groups are placed directly under the root.
pub(crate) fn numa_tree(
    cpus: &[CpuId],
    numa_nodes: &[(NumaId, Vec<CpuId>)],
    caches: &CacheMap,
) -> GroupBuilder {
    let max_level = caches.max_level(cpus);
    let mut root = GroupBuilder::new();

    if numa_nodes.is_empty() {
        for child in caches.nest(cpus, max_level) {
            root.push_child(child);
        }

        return root;
    }

    let online: HashSet<CpuId> = cpus.iter().copied().collect();
    let mut claimed = HashSet::with_capacity(cpus.len());

    for (numa, node_cpus) in numa_nodes {
        let members: Vec<CpuId> = node_cpus
            .iter()
            .copied()
            .filter(|cpu| online.contains(cpu) && !claimed.contains(cpu))
            .collect();

        if members.is_empty() {
            continue;
        }

        claimed.extend(members.iter().copied());

        let mut node = GroupBuilder::new().numa(*numa);

        for child in caches.nest(&members, max_level) {
            node.push_child(child);
        }

        root.push_child(node);
    }

    let leftovers: Vec<CpuId> = cpus
        .iter()
        .copied()
        .filter(|cpu| !claimed.contains(cpu))
        .collect();

    if !leftovers.is_empty() {
        tracing::debug!(
            count = leftovers.len(),
            "processors without NUMA node attribution"
        );

        let mut orphans = GroupBuilder::new();

        for child in caches.nest(&leftovers, max_level) {
            orphans.push_child(child);
        }

        root.push_child(orphans);
    }

    root
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn cpu(id: i32) -> CpuId {
        CpuId::new(id)
    }

    fn cache(level: u32, size: u64, shared: &[i32]) -> CacheDescriptor {
        CacheDescriptor {
            level,
            size: Some(size),
            line: Some(64),
            shared_cpus: shared.iter().copied().map(cpu).collect(),
        }
    }

    // 4 processors, 2 cores with SMT, one L3: L1/L2 per core.
    fn smt_caches() -> CacheMap {
        let mut map = CacheMap::new();

        for (id, sibling) in [(0, 1), (1, 0), (2, 3), (3, 2)] {
            map.insert(cpu(id), cache(1, 32 * 1024, &[id, sibling]));
            map.insert(cpu(id), cache(2, 1024 * 1024, &[id, sibling]));
            map.insert(cpu(id), cache(3, 8 * 1024 * 1024, &[0, 1, 2, 3]));
        }

        map
    }

    #[test]
    fn max_level_considers_only_given_cpus() {
        let mut map = smt_caches();
        map.insert(cpu(9), cache(4, 1, &[9]));

        assert_eq!(map.max_level(&[cpu(0), cpu(1)]), 3);
        assert_eq!(map.max_level(&[cpu(9)]), 4);
        assert_eq!(map.max_level(&[cpu(42)]), 0);
    }

    #[test]
    fn first_cache_per_level_wins() {
        let mut map = CacheMap::new();
        map.insert(cpu(0), cache(1, 100, &[0]));
        map.insert(cpu(0), cache(1, 200, &[0]));
        map.insert(cpu(0), cache(0, 300, &[0]));

        assert_eq!(map.get(cpu(0), 1).and_then(|c| c.size), Some(100));
        assert!(map.get(cpu(0), 0).is_none());
    }

    #[test]
    fn nests_caches_coarsest_first() {
        let map = smt_caches();
        let cpus = [cpu(0), cpu(1), cpu(2), cpu(3)];

        let mut root = GroupBuilder::new();
        for child in map.nest(&cpus, 3) {
            root.push_child(child);
        }
        let topology = root.build();

        let l3 = topology.root_group().children();
        assert_eq!(l3.len(), 1);
        assert_eq!(topology.group(l3[0]).cache_level(), Some(3));

        let l2 = topology.group(l3[0]).children();
        assert_eq!(l2.len(), 2);
        assert_eq!(topology.group(l2[1]).cpus(), &[cpu(2), cpu(3)]);

        let l1 = topology.group(l2[0]).children();
        assert_eq!(l1.len(), 1);
        assert_eq!(topology.group(l1[0]).cache_level(), Some(1));
        assert_eq!(topology.group(l1[0]).cache_size(), Some(32 * 1024));
        assert_eq!(topology.group(l1[0]).children().len(), 2);
    }

    #[test]
    fn sharing_is_restricted_to_given_cpus() {
        let map = smt_caches();

        let groups = map.nest(&[cpu(1), cpu(2)], 3);
        let mut root = GroupBuilder::new();
        for child in groups {
            root.push_child(child);
        }
        let topology = root.build();

        assert_eq!(topology.cpus(), &[cpu(1), cpu(2)]);

        let l3 = topology.root_group().children()[0];
        assert_eq!(topology.group(l3).children().len(), 2);
    }

    #[test]
    fn missing_level_is_skipped() {
        let mut map = CacheMap::new();
        map.insert(cpu(0), cache(2, 1024, &[0, 1]));
        map.insert(cpu(1), cache(2, 1024, &[0, 1]));
        map.insert(cpu(0), cache(1, 64, &[0]));
        // cpu 1 has no L1 information.

        let groups = map.nest(&[cpu(0), cpu(1)], 2);
        assert_eq!(groups.len(), 1);

        let topology = groups
            .into_iter()
            .next()
            .expect("asserted above")
            .build();

        // Root is the L2; its children are the L1 of cpu 0 and the bare leaf of cpu 1.
        let children = topology.root_group().children();
        assert_eq!(children.len(), 2);
        assert_eq!(topology.group(children[0]).cache_level(), Some(1));
        assert!(topology.group(children[1]).is_cpu());
    }

    #[test]
    fn inconsistent_sharing_first_claim_wins() {
        let mut map = CacheMap::new();
        map.insert(cpu(0), cache(1, 1, &[0, 1]));
        map.insert(cpu(1), cache(1, 1, &[1, 2]));
        map.insert(cpu(2), cache(1, 1, &[1, 2]));

        let groups = map.nest(&[cpu(0), cpu(1), cpu(2)], 1);

        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn numa_nodes_wrap_caches() {
        let map = smt_caches();
        let cpus = [cpu(0), cpu(1), cpu(2), cpu(3)];
        let nodes = vec![
            (NumaId::new(0), vec![cpu(0), cpu(1)]),
            (NumaId::new(1), vec![cpu(2), cpu(3), cpu(7)]),
        ];

        let topology = numa_tree(&cpus, &nodes, &map).build();

        let numa = topology.root_group().children();
        assert_eq!(numa.len(), 2);
        assert_eq!(topology.group(numa[1]).numa(), NumaId::new(1));
        assert_eq!(topology.group(numa[1]).cache_level(), None);
        assert_eq!(topology.group(numa[1]).cpus(), &[cpu(2), cpu(3)]);

        // The shared L3 is split along the NUMA boundary.
        let l3 = topology.group(numa[0]).children();
        assert_eq!(l3.len(), 1);
        assert_eq!(topology.group(l3[0]).cache_level(), Some(3));
    }

    #[test]
    fn cpus_outside_numa_nodes_are_kept() {
        let map = CacheMap::new();
        let cpus = [cpu(0), cpu(1), cpu(2)];
        let nodes = vec![(NumaId::new(0), vec![cpu(0)])];

        let topology = numa_tree(&cpus, &nodes, &map).build();

        assert_eq!(topology.cpus(), &cpus);

        let groups = topology.root_group().children();
        assert_eq!(groups.len(), 2);
        assert!(!topology.group(groups[1]).numa().is_valid());
    }

    #[test]
    fn no_numa_nodes_puts_caches_under_root() {
        let map = smt_caches();
        let cpus = [cpu(0), cpu(1), cpu(2), cpu(3)];

        let topology = numa_tree(&cpus, &[], &map).build();

        let top = topology.root_group().children();
        assert_eq!(top.len(), 1);
        assert_eq!(topology.group(top[0]).cache_level(), Some(3));
    }
}
