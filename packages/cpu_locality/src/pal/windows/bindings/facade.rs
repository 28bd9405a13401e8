#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::{self, Debug};
#[cfg(test)]
use std::sync::Arc;

use windows::Win32::System::SystemInformation::{
    GROUP_AFFINITY, LOGICAL_PROCESSOR_RELATIONSHIP, SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX,
};
use windows::core::Result;

#[cfg(test)]
use crate::pal::windows::MockBindings;
use crate::pal::windows::{Bindings, BuildTargetBindings};

/// Hide the real/mock bindings choice behind a single type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    unsafe fn get_logical_processor_information_ex(
        &self,
        relationship_type: LOGICAL_PROCESSOR_RELATIONSHIP,
        buffer: Option<*mut SYSTEM_LOGICAL_PROCESSOR_INFORMATION_EX>,
        returned_length: *mut u32,
    ) -> Result<()> {
        match self {
            // SAFETY: Forwarding safety requirements to caller.
            Self::Target(bindings) => unsafe {
                bindings.get_logical_processor_information_ex(
                    relationship_type,
                    buffer,
                    returned_length,
                )
            },
            #[cfg(test)]
            // SAFETY: Forwarding safety requirements to caller.
            Self::Mock(bindings) => unsafe {
                bindings.get_logical_processor_information_ex(
                    relationship_type,
                    buffer,
                    returned_length,
                )
            },
        }
    }

    fn set_current_thread_group_affinity(&self, affinity: &GROUP_AFFINITY) -> Result<()> {
        match self {
            Self::Target(bindings) => bindings.set_current_thread_group_affinity(affinity),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.set_current_thread_group_affinity(affinity),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
