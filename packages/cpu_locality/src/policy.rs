/// Tunable constants of the [`Platform`][crate::Platform] metrics.
///
/// The defaults are empirical choices that work well on common hardware. No invariant ties
/// them to measured latencies, so they can be adjusted to match a particular machine, as long
/// as you keep in mind that distance and proximity values are only comparable between
/// platforms that use the same policy.
///
/// # Example
///
/// ```
/// use cpu_locality::{MetricsPolicy, Platform, Topology};
///
/// // Treat crossing NUMA nodes as more expensive than the default.
/// let policy = MetricsPolicy::default().with_numa_penalty(4);
///
/// let platform = Platform::with_policy(Topology::current(), policy);
/// println!("Max distance: {}", platform.max_distance());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MetricsPolicy {
    numa_penalty: u32,
    default_cache_line: u32,
}

impl MetricsPolicy {
    /// Creates the default policy: a NUMA penalty of 2 and a default cache line of 64 bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            numa_penalty: 2,
            default_cache_line: 64,
        }
    }

    /// Sets the number of tree levels added to the distance between two processors in
    /// different NUMA nodes (before halving).
    #[must_use]
    pub const fn with_numa_penalty(mut self, levels: u32) -> Self {
        self.numa_penalty = levels;
        self
    }

    /// Sets the cache line size in bytes reported when no cache line size is known.
    #[must_use]
    pub const fn with_default_cache_line(mut self, bytes: u32) -> Self {
        self.default_cache_line = bytes;
        self
    }

    /// The number of tree levels added to the distance between two processors in different
    /// NUMA nodes (before halving).
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub const fn numa_penalty(&self) -> u32 {
        self.numa_penalty
    }

    /// The cache line size in bytes reported when no cache line size is known.
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[must_use]
    pub const fn default_cache_line(&self) -> u32 {
        self.default_cache_line
    }
}

impl Default for MetricsPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(MetricsPolicy: Send, Sync, Copy);

    #[test]
    fn defaults() {
        let policy = MetricsPolicy::default();

        assert_eq!(policy.numa_penalty(), 2);
        assert_eq!(policy.default_cache_line(), 64);
    }

    #[test]
    fn with_methods_override_one_value() {
        let policy = MetricsPolicy::new()
            .with_numa_penalty(0)
            .with_default_cache_line(128);

        assert_eq!(policy.numa_penalty(), 0);
        assert_eq!(policy.default_cache_line(), 128);
    }
}
