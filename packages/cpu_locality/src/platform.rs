use std::fmt::{self, Display};
use std::sync::Arc;

use foldhash::HashSet;
use itertools::Itertools;
use nonempty::NonEmpty;

use crate::{CpuId, GroupIndex, MetricsPolicy, NumaId, PlatformBuilder, Topology};

/// Whether [`Platform::filter_sys_cpu()`] keeps or drops the listed processors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a filter either keeps or drops, there is no third option"
)]
pub enum FilterMode {
    /// Keep only the listed processors.
    Keep,

    /// Keep every processor except the listed ones.
    Exclude,
}

/// Locality metrics for a working set of processors, derived from a [`Topology`].
///
/// The platform assigns each processor of the working set a *compact index* in `0..cpu_count()`
/// and each NUMA node a compact index in `0..numa_count()`. All metrics are addressed by compact
/// index. Compact indexes change whenever the working set changes, while the system IDs
/// ([`CpuId`], [`NumaId`]) they map to do not.
///
/// For every pair of processors the platform knows:
///
/// * The [`distance()`][Self::distance]: how many tree levels separate the two processors,
///   with an extra penalty for crossing NUMA nodes. Zero for a processor and itself.
/// * The [`proximity()`][Self::proximity]: the inverse of distance on an exponential scale,
///   where bigger means closer. Suitable as a weight for distributing work.
///
/// For every processor it knows the [`roundtrip()`][Self::roundtrip]: all processors of the
/// working set ordered by increasing distance, starting from the processor itself. A worker
/// that needs to visit its peers (e.g. to steal work or to combine results) should visit them
/// in this order.
///
/// The working set can be changed at any time via [`use_sys_cpu()`][Self::use_sys_cpu] and
/// the methods built on it. This recomputes every metric and requires exclusive access, so
/// do it before sharing the platform between threads. The topology itself is never modified.
///
/// # Example
///
/// ```
/// use cpu_locality::Platform;
///
/// let mut platform = Platform::current();
/// platform.disable_smt();
///
/// for cpu in 0..platform.cpu_count() {
///     println!(
///         "processor {} visits its peers in order {:?}",
///         platform.cpu_id(cpu),
///         platform.roundtrip(cpu)
///     );
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Platform {
    topology: Arc<Topology>,
    policy: MetricsPolicy,

    cpu_ids: Vec<CpuId>,
    numa_ids: NonEmpty<NumaId>,
    numa_of_cpu: Vec<Option<usize>>,

    // Indexed by [level - 1][cpu]. Zero means unknown.
    cache_sizes: Vec<Vec<u64>>,
    cache_lines: Vec<Vec<u32>>,

    max_cache_level: u32,
    max_cache_line: u32,
    max_distance: u32,

    // Row-major square matrices.
    distances: Vec<u32>,
    proximities: Vec<u64>,
    roundtrips: Vec<usize>,
}

impl Platform {
    /// Creates a platform whose working set is every processor of the topology, using the
    /// default [`MetricsPolicy`].
    ///
    /// # Panics
    ///
    /// Panics if the topology is empty. Topologies returned by [`Topology::current()`] and
    /// [`detect()`][crate::detect] never are.
    #[must_use]
    pub fn new(topology: Arc<Topology>) -> Self {
        Self::with_policy(topology, MetricsPolicy::default())
    }

    /// Creates a platform whose working set is every processor of the topology.
    ///
    /// # Panics
    ///
    /// Panics if the topology is empty.
    #[must_use]
    pub fn with_policy(topology: Arc<Topology>, policy: MetricsPolicy) -> Self {
        Self::compute(topology, policy, &[])
    }

    /// Creates a platform for every processor of the current machine.
    ///
    /// The machine is probed only once per process, see [`Topology::current()`].
    #[must_use]
    pub fn current() -> Self {
        Self::new(Topology::current())
    }

    /// Starts building a platform with a custom working set or policy.
    #[cfg_attr(test, mutants::skip)] // Trivial constructor.
    #[must_use]
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::new()
    }

    /// Replaces the working set with the listed processors and recomputes every metric.
    ///
    /// Processors not present in the topology are ignored. If that leaves nothing (including
    /// when the list is empty), the working set becomes every processor of the topology.
    /// The order of the list does not matter: compact indexes always follow the order in
    /// which processors appear in the topology.
    pub fn use_sys_cpu(&mut self, cpus: &[CpuId]) {
        *self = Self::compute(Arc::clone(&self.topology), self.policy, cpus);
    }

    /// Keeps or drops the listed processors of the *current* working set, then recomputes every
    /// metric via [`use_sys_cpu()`][Self::use_sys_cpu].
    ///
    /// If nothing remains, the working set becomes every processor of the topology.
    pub fn filter_sys_cpu(&mut self, cpus: &[CpuId], mode: FilterMode) {
        let listed: HashSet<CpuId> = cpus.iter().copied().collect();

        let kept = self
            .cpu_ids
            .iter()
            .copied()
            .filter(|cpu| match mode {
                FilterMode::Keep => listed.contains(cpu),
                FilterMode::Exclude => !listed.contains(cpu),
            })
            .collect_vec();

        self.use_sys_cpu(&kept);
    }

    /// Narrows the current working set down to the `n`-th processor of every cache group at
    /// `level`, with negative `n` counting from the end of each group.
    ///
    /// See [`Topology::collect_nth_cpu_of_cache_level()`].
    pub fn use_nth_cpu_of_cache_level(&mut self, n: isize, level: u32) {
        let representatives = self.topology.collect_nth_cpu_of_cache_level(n, level);
        self.filter_sys_cpu(&representatives, FilterMode::Keep);
    }

    /// Narrows the current working set down to one logical processor per physical core (i.e.
    /// per level 1 cache), disabling simultaneous multithreading.
    ///
    /// If the topology has no level 1 cache information, the working set becomes every
    /// processor of the topology.
    pub fn disable_smt(&mut self) {
        self.use_nth_cpu_of_cache_level(0, 1);
    }

    /// The topology the metrics are derived from.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// The policy the metrics are computed with.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub fn policy(&self) -> MetricsPolicy {
        self.policy
    }

    /// Number of processors in the working set. Never zero.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpu_ids.len()
    }

    /// Number of NUMA nodes the working set spans. Never zero: if the topology carries no NUMA
    /// information, there is a single node with [`NumaId::INVALID`].
    #[must_use]
    pub fn numa_count(&self) -> usize {
        self.numa_ids.len()
    }

    /// The system ID of the processor at a compact index.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    #[must_use]
    pub fn cpu_id(&self, cpu: usize) -> CpuId {
        *self
            .cpu_ids
            .get(cpu)
            .expect("processor index out of range")
    }

    /// The system IDs of the working set, in compact index order.
    #[must_use]
    pub fn cpu_ids(&self) -> &[CpuId] {
        &self.cpu_ids
    }

    /// The system ID of the NUMA node at a compact index.
    ///
    /// # Panics
    ///
    /// Panics if `numa` is not in `0..numa_count()`.
    #[must_use]
    pub fn numa_id(&self, numa: usize) -> NumaId {
        *self
            .numa_ids
            .get(numa)
            .expect("NUMA node index out of range")
    }

    /// The compact index of the NUMA node that owns the processor at a compact index, if known.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    #[must_use]
    pub fn numa(&self, cpu: usize) -> Option<usize> {
        *self
            .numa_of_cpu
            .get(cpu)
            .expect("processor index out of range")
    }

    /// The highest cache level in the working set, 0 if no cache is known.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub fn max_cache_level(&self) -> u32 {
        self.max_cache_level
    }

    /// The largest cache line size in bytes in the working set, or the default of the policy
    /// if no cache line size is known.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub fn max_cache_line(&self) -> u32 {
        self.max_cache_line
    }

    /// The size in bytes of the cache at `level` used by the processor at a compact index.
    ///
    /// Zero if unknown or if there is no such cache level.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    #[must_use]
    pub fn cache_size(&self, cpu: usize, level: u32) -> u64 {
        self.check_cpu(cpu);
        per_level(&self.cache_sizes, cpu, level)
    }

    /// The cache line size in bytes of the cache at `level` used by the processor at a compact
    /// index.
    ///
    /// Zero if unknown or if there is no such cache level.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    #[must_use]
    pub fn cache_line(&self, cpu: usize, level: u32) -> u32 {
        self.check_cpu(cpu);
        per_level(&self.cache_lines, cpu, level)
    }

    /// The largest distance between any two processors of the working set.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    /// The topological distance between two processors, by compact index.
    ///
    /// Zero for a processor and itself, symmetric and at most
    /// [`max_distance()`][Self::max_distance].
    ///
    /// # Panics
    ///
    /// Panics if either index is not in `0..cpu_count()`.
    #[must_use]
    pub fn distance(&self, cpu: usize, other: usize) -> u32 {
        *self
            .distances
            .get(self.cell(cpu, other))
            .expect("cell of a checked pair is in range")
    }

    /// The proximity of two processors, by compact index: `2^(max_distance + 1) - 2^distance`.
    ///
    /// The closer the processors, the bigger the value. Always positive.
    ///
    /// # Panics
    ///
    /// Panics if either index is not in `0..cpu_count()`.
    #[must_use]
    pub fn proximity(&self, cpu: usize, other: usize) -> u64 {
        *self
            .proximities
            .get(self.cell(cpu, other))
            .expect("cell of a checked pair is in range")
    }

    /// Every compact processor index of the working set, ordered by increasing distance from
    /// the processor at a compact index, which always comes first.
    ///
    /// Processors at the same distance are ordered by compact index, starting after `cpu` and
    /// wrapping around. Different processors therefore start visiting a remote group at
    /// different members of it.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    #[must_use]
    pub fn roundtrip(&self, cpu: usize) -> &[usize] {
        let start = self.cell(cpu, 0);
        let end = start
            .checked_add(self.cpu_count())
            .expect("cell of a checked pair is in range");

        self.roundtrips
            .get(start..end)
            .expect("cell of a checked pair is in range")
    }

    /// Binds the current thread to the processor at a compact index.
    ///
    /// See [`bind_current_thread()`][crate::bind_current_thread].
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses the binding or does not support it.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not in `0..cpu_count()`.
    pub fn bind_current_thread(&self, cpu: usize) -> crate::Result<()> {
        crate::bind_current_thread(self.cpu_id(cpu))
    }

    fn check_cpu(&self, cpu: usize) {
        assert!(
            cpu < self.cpu_count(),
            "processor index {cpu} out of range for {} processors",
            self.cpu_count()
        );
    }

    fn cell(&self, cpu: usize, other: usize) -> usize {
        self.check_cpu(cpu);
        self.check_cpu(other);

        cpu.checked_mul(self.cpu_count())
            .and_then(|row| row.checked_add(other))
            .expect("matrix of a non-empty working set fits in memory")
    }

    pub(crate) fn compute(
        topology: Arc<Topology>,
        policy: MetricsPolicy,
        cpus: &[CpuId],
    ) -> Self {
        assert!(
            !topology.is_empty(),
            "cannot derive platform metrics from an empty topology"
        );

        let requested: HashSet<CpuId> = cpus.iter().copied().collect();
        let mut cpu_paths = leaf_paths(&topology, |cpu| requested.contains(&cpu));

        if cpu_paths.is_empty() {
            if !cpus.is_empty() {
                tracing::debug!(
                    requested = cpus.len(),
                    "none of the requested processors is in the topology, using all processors"
                );
            }

            cpu_paths = leaf_paths(&topology, |_| true);
        }

        let cpu_ids = cpu_paths
            .iter()
            .map(|path| {
                let leaf = path.last().expect("a leaf path includes the leaf");
                *topology
                    .group(*leaf)
                    .cpus()
                    .first()
                    .expect("a leaf has exactly one processor")
            })
            .collect_vec();

        let numa_ids = distinct_numa_ids(&topology, &cpu_paths);

        let numa_of_cpu = cpu_paths
            .iter()
            .map(|path| {
                // The deepest group whose node is known decides.
                path.iter().rev().find_map(|&index| {
                    let numa = topology.group(index).numa();
                    numa_ids.iter().position(|&id| id == numa)
                })
            })
            .collect_vec();

        let max_cache_level = cpu_paths
            .iter()
            .flatten()
            .filter_map(|&index| topology.group(index).cache_level())
            .max()
            .unwrap_or(0);

        let max_cache_line = cpu_paths
            .iter()
            .flatten()
            .filter_map(|&index| topology.group(index).cache_line())
            .max()
            .filter(|&line| line > 0)
            .unwrap_or_else(|| policy.default_cache_line());

        let (cache_sizes, cache_lines) = cache_geometry(&topology, &cpu_paths, max_cache_level);

        let distances = cpu_paths
            .iter()
            .zip(&numa_of_cpu)
            .cartesian_product(cpu_paths.iter().zip(&numa_of_cpu))
            .map(|((path, numa), (other_path, other_numa))| {
                distance(path, other_path, numa != other_numa, policy)
            })
            .collect_vec();

        let max_distance = distances.iter().copied().max().unwrap_or(0);

        let proximities = distances
            .iter()
            .map(|&distance| proximity(distance, max_distance))
            .collect_vec();

        let roundtrips = (0..cpu_paths.len())
            .flat_map(|cpu| roundtrip(&cpu_paths, cpu))
            .collect_vec();

        tracing::debug!(
            cpu_count = cpu_ids.len(),
            numa_count = numa_ids.len(),
            max_cache_level,
            max_distance,
            "computed platform metrics"
        );

        Self {
            topology,
            policy,
            cpu_ids,
            numa_ids,
            numa_of_cpu,
            cache_sizes,
            cache_lines,
            max_cache_level,
            max_cache_line,
            max_distance,
            distances,
            proximities,
            roundtrips,
        }
    }
}

// Root-to-leaf paths of every leaf whose processor is accepted, in pre-order.
fn leaf_paths<F>(topology: &Topology, mut accept: F) -> Vec<Vec<GroupIndex>>
where
    F: FnMut(CpuId) -> bool,
{
    let mut paths = Vec::new();

    topology.for_each_group(|index, group, ancestors| {
        if group.is_cpu() && group.cpus().iter().copied().all(&mut accept) {
            let mut path = ancestors.to_vec();
            path.push(index);
            paths.push(path);
        }
    });

    paths
}

// NUMA nodes in the order they are first seen along the paths, or a single unknown node.
fn distinct_numa_ids(topology: &Topology, cpu_paths: &[Vec<GroupIndex>]) -> NonEmpty<NumaId> {
    let known = cpu_paths
        .iter()
        .flatten()
        .map(|&index| topology.group(index).numa())
        .filter(|numa| numa.is_valid())
        .unique()
        .collect_vec();

    NonEmpty::from_vec(known).unwrap_or_else(|| NonEmpty::new(NumaId::INVALID))
}

fn cache_geometry(
    topology: &Topology,
    cpu_paths: &[Vec<GroupIndex>],
    max_cache_level: u32,
) -> (Vec<Vec<u64>>, Vec<Vec<u32>>) {
    let level_count = usize::try_from(max_cache_level).expect("cache levels fit in usize");

    let mut sizes = vec![vec![0; cpu_paths.len()]; level_count];
    let mut lines = vec![vec![0; cpu_paths.len()]; level_count];

    for (cpu, path) in cpu_paths.iter().enumerate() {
        for &index in path {
            let group = topology.group(index);

            let Some(slot) = group
                .cache_level()
                .and_then(|level| level.checked_sub(1))
                .and_then(|level| usize::try_from(level).ok())
            else {
                continue;
            };

            if let Some(size) = sizes.get_mut(slot).and_then(|row| row.get_mut(cpu)) {
                *size = group.cache_size().unwrap_or(0);
            }

            if let Some(line) = lines.get_mut(slot).and_then(|row| row.get_mut(cpu)) {
                *line = group.cache_line().unwrap_or(0);
            }
        }
    }

    (sizes, lines)
}

fn per_level<T>(table: &[Vec<T>], cpu: usize, level: u32) -> T
where
    T: Copy + Default,
{
    level
        .checked_sub(1)
        .and_then(|slot| usize::try_from(slot).ok())
        .and_then(|slot| table.get(slot))
        .and_then(|row| row.get(cpu))
        .copied()
        .unwrap_or_default()
}

// Half the number of levels both processors climb to reach their closest common ancestor,
// rounded up, with a penalty for crossing NUMA nodes.
fn distance(
    path: &[GroupIndex],
    other_path: &[GroupIndex],
    crosses_numa: bool,
    policy: MetricsPolicy,
) -> u32 {
    let common = path
        .iter()
        .zip(other_path)
        .take_while(|(a, b)| a == b)
        .count();

    let climb = path
        .len()
        .saturating_sub(common)
        .saturating_add(other_path.len().saturating_sub(common));
    let climb = u32::try_from(climb).expect("tree depth fits in u32");

    let penalty = if crosses_numa {
        policy.numa_penalty()
    } else {
        0
    };

    climb.saturating_add(penalty).div_ceil(2)
}

fn proximity(distance: u32, max_distance: u32) -> u64 {
    power_of_two(max_distance.saturating_add(1)).saturating_sub(power_of_two(distance))
}

fn power_of_two(exponent: u32) -> u64 {
    1_u64.checked_shl(exponent).unwrap_or(u64::MAX)
}

// Walks up from the leaf, at each ancestor appending the processors that are under it but
// not under the child just left, rotated to start after `cpu`.
fn roundtrip(cpu_paths: &[Vec<GroupIndex>], cpu: usize) -> Vec<usize> {
    let path = cpu_paths.get(cpu).expect("roundtrip origin is in range");
    let rotation = (cpu..cpu_paths.len()).chain(0..cpu).collect_vec();

    let mut result = Vec::with_capacity(cpu_paths.len());
    result.push(cpu);

    let mut ancestors = path.iter().rev();
    let Some(mut previous) = ancestors.next() else {
        return result;
    };

    for ancestor in ancestors {
        result.extend(rotation.iter().copied().filter(|&other| {
            let other_path = cpu_paths.get(other).expect("rotation is in range");
            other_path.contains(ancestor) && !other_path.contains(previous)
        }));

        previous = ancestor;
    }

    result
}

impl Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "numa_sys_id: {}", self.numa_ids.iter().join(" "))?;
        writeln!(f, "cpu_sys_id: {}", self.cpu_ids.iter().join(" "))?;
        writeln!(
            f,
            "numa_node: {}",
            self.numa_of_cpu
                .iter()
                .map(|numa| numa.map_or_else(|| "-1".to_owned(), |numa| numa.to_string()))
                .join(" ")
        )?;
        writeln!(f, "max_cache_level: {}", self.max_cache_level)?;
        writeln!(f, "max_cache_line: {}", self.max_cache_line)?;

        for (level, row) in (1..).zip(&self.cache_sizes) {
            writeln!(f, "cache_size[{level}]: {}", row.iter().join(" "))?;
        }

        for (level, row) in (1..).zip(&self.cache_lines) {
            writeln!(f, "cache_line[{level}]: {}", row.iter().join(" "))?;
        }

        for cpu in 0..self.cpu_count() {
            let row = (0..self.cpu_count()).map(|other| self.distance(cpu, other));
            writeln!(f, "distance[{cpu}]: {}", row.format(" "))?;
        }

        for cpu in 0..self.cpu_count() {
            let row = (0..self.cpu_count()).map(|other| self.proximity(cpu, other));
            writeln!(f, "proximity[{cpu}]: {}", row.format(" "))?;
        }

        for cpu in 0..self.cpu_count() {
            writeln!(f, "roundtrip[{cpu}]: {}", self.roundtrip(cpu).iter().format(" "))?;
        }

        Ok(())
    }
}
