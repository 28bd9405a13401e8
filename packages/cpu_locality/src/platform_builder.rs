use std::sync::Arc;

use foldhash::{HashSet, HashSetExt};

use crate::{CpuId, MetricsPolicy, Platform, Topology};

/// Builds a [`Platform`] with a custom initial working set or [`MetricsPolicy`].
///
/// The default criteria include every processor of the current machine. Each selection method
/// narrows the candidates down further and exclusions are removed last. If no candidate
/// remains, the platform uses every processor of the topology, same as
/// [`Platform::use_sys_cpu()`].
///
/// You can obtain a builder via [`Platform::builder()`] or [`PlatformBuilder::new()`].
///
/// # Example
///
/// ```
/// use cpu_locality::{MetricsPolicy, Platform};
///
/// let first = Platform::current().cpu_id(0);
///
/// // One processor per physical core, except the first one, which we keep for ourselves.
/// let platform = Platform::builder()
///     .without_smt()
///     .except([first])
///     .policy(MetricsPolicy::default().with_numa_penalty(4))
///     .build();
///
/// println!("Using {} processors", platform.cpu_count());
/// ```
#[derive(Clone, Debug)]
pub struct PlatformBuilder {
    topology: Option<Arc<Topology>>,
    policy: MetricsPolicy,

    selectors: Vec<CpuSelector>,
    except_ids: HashSet<CpuId>,
}

impl PlatformBuilder {
    /// Creates a builder that considers every processor of the current machine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topology: None,
            policy: MetricsPolicy::default(),
            selectors: Vec::new(),
            except_ids: HashSet::new(),
        }
    }

    /// Derives the platform from the given topology instead of [`Topology::current()`].
    #[must_use]
    pub fn topology(mut self, topology: Arc<Topology>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Computes the metrics with the given policy instead of the default one.
    #[must_use]
    pub fn policy(mut self, policy: MetricsPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Requires that every processor be one of the listed ones.
    #[must_use]
    pub fn cpus<I>(mut self, cpus: I) -> Self
    where
        I: IntoIterator<Item = CpuId>,
    {
        self.selectors.push(CpuSelector::Listed(cpus.into_iter().collect()));
        self
    }

    /// Requires that every processor be the `n`-th processor of its cache group at `level`,
    /// with negative `n` counting from the end of the group.
    ///
    /// See [`Topology::collect_nth_cpu_of_cache_level()`].
    #[must_use]
    pub fn nth_cpu_of_cache_level(mut self, n: isize, level: u32) -> Self {
        self.selectors.push(CpuSelector::NthOfCacheLevel { n, level });
        self
    }

    /// Requires one logical processor per physical core, disabling simultaneous multithreading.
    #[must_use]
    pub fn without_smt(self) -> Self {
        self.nth_cpu_of_cache_level(0, 1)
    }

    /// Removes the listed processors from the candidates.
    #[must_use]
    pub fn except<I>(mut self, cpus: I) -> Self
    where
        I: IntoIterator<Item = CpuId>,
    {
        self.except_ids.extend(cpus);
        self
    }

    /// Builds the platform from the processors that satisfy every criterion.
    ///
    /// # Panics
    ///
    /// Panics if the topology given to [`topology()`][Self::topology] is empty.
    #[must_use]
    pub fn build(self) -> Platform {
        let topology = self.topology.unwrap_or_else(Topology::current);

        let mut candidates = topology.cpus().to_vec();

        for selector in &self.selectors {
            let allowed = selector.select(&topology);
            candidates.retain(|cpu| allowed.contains(cpu));
        }

        candidates.retain(|cpu| !self.except_ids.contains(cpu));

        tracing::trace!(
            candidates = candidates.len(),
            selectors = self.selectors.len(),
            excluded = self.except_ids.len(),
            "building platform"
        );

        Platform::compute(topology, self.policy, &candidates)
    }
}

impl Default for PlatformBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
enum CpuSelector {
    Listed(HashSet<CpuId>),
    NthOfCacheLevel { n: isize, level: u32 },
}

impl CpuSelector {
    fn select(&self, topology: &Topology) -> HashSet<CpuId> {
        match self {
            Self::Listed(cpus) => cpus.clone(),
            Self::NthOfCacheLevel { n, level } => topology
                .collect_nth_cpu_of_cache_level(*n, *level)
                .into_iter()
                .collect(),
        }
    }
}
