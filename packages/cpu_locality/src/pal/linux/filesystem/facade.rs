use std::fmt::{self, Debug};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::linux::MockFilesystem;
use crate::pal::linux::{BuildTargetFilesystem, Filesystem};

/// Enum to hide the different filesystem implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum FilesystemFacade {
    Target(&'static BuildTargetFilesystem),

    #[cfg(test)]
    Mock(Arc<MockFilesystem>),
}

impl FilesystemFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetFilesystem)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockFilesystem) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Filesystem for FilesystemFacade {
    fn get_cpu_online_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_online_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_online_contents(),
        }
    }

    fn get_numa_node_online_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_numa_node_online_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_numa_node_online_contents(),
        }
    }

    fn get_numa_node_cpulist_contents(&self, node_index: u32) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_numa_node_cpulist_contents(node_index),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_numa_node_cpulist_contents(node_index),
        }
    }

    fn get_cpu_cache_contents(
        &self,
        cpu_index: u32,
        cache_index: u32,
        attribute: &str,
    ) -> Option<String> {
        match self {
            Self::Target(filesystem) => {
                filesystem.get_cpu_cache_contents(cpu_index, cache_index, attribute)
            }
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_cache_contents(cpu_index, cache_index, attribute),
        }
    }

    fn get_cpu_topology_contents(&self, cpu_index: u32, attribute: &str) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_topology_contents(cpu_index, attribute),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_topology_contents(cpu_index, attribute),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for FilesystemFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
