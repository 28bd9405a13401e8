use std::fmt::{self, Debug};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockProbe;
#[cfg(test)]
use crate::pal::fallback::BuildTargetProbe as FallbackProbe;
use crate::pal::{BUILD_TARGET_PROBE, BuildTargetProbe, Probe};
use crate::{CpuId, Topology};

/// Enum to hide the real/fallback/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum ProbeFacade {
    Target(&'static BuildTargetProbe),

    #[cfg(test)]
    Fallback(&'static FallbackProbe),

    #[cfg(test)]
    Mock(Arc<MockProbe>),
}

impl ProbeFacade {
    pub(crate) fn target() -> Self {
        Self::Target(&BUILD_TARGET_PROBE)
    }

    #[cfg(test)]
    pub(crate) fn fallback() -> Self {
        Self::Fallback(&crate::pal::fallback::BUILD_TARGET_PROBE)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockProbe) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Probe for ProbeFacade {
    fn detect_topology(&self) -> Topology {
        match self {
            Self::Target(p) => p.detect_topology(),
            #[cfg(test)]
            Self::Fallback(p) => p.detect_topology(),
            #[cfg(test)]
            Self::Mock(p) => p.detect_topology(),
        }
    }

    fn hardware_concurrency(&self) -> usize {
        match self {
            Self::Target(p) => p.hardware_concurrency(),
            #[cfg(test)]
            Self::Fallback(p) => p.hardware_concurrency(),
            #[cfg(test)]
            Self::Mock(p) => p.hardware_concurrency(),
        }
    }

    fn cache_geometry(&self, level: u32) -> (Option<u64>, Option<u32>) {
        match self {
            Self::Target(p) => p.cache_geometry(level),
            #[cfg(test)]
            Self::Fallback(p) => p.cache_geometry(level),
            #[cfg(test)]
            Self::Mock(p) => p.cache_geometry(level),
        }
    }

    fn bind_current_thread(&self, cpu: CpuId) -> crate::Result<()> {
        match self {
            Self::Target(p) => p.bind_current_thread(cpu),
            #[cfg(test)]
            Self::Fallback(p) => p.bind_current_thread(cpu),
            #[cfg(test)]
            Self::Mock(p) => p.bind_current_thread(cpu),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for ProbeFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Fallback(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
