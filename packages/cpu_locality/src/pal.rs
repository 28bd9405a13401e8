//! Platform Abstraction Layer (PAL). Everything that talks to the operating system to discover
//! the hardware topology or to bind threads lives here, behind the [`Probe`] trait.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

// The cache nesting logic is shared by every backend that receives per-processor cache data.
#[cfg(any(test, all(any(target_os = "linux", windows), not(miri))))]
mod cache_tree;
#[cfg(any(test, all(any(target_os = "linux", windows), not(miri))))]
pub(crate) use cache_tree::*;

#[cfg(all(target_os = "linux", not(miri)))]
mod linux;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use linux::*;

#[cfg(all(windows, not(miri)))]
mod windows;
#[cfg(all(windows, not(miri)))]
pub(crate) use windows::*;

// The fallback module is compiled in test mode on all platforms, under Miri, and as the primary
// implementation on unsupported platforms. On supported platforms in test mode, it must be
// accessed via the explicit path `fallback::` to avoid ambiguity with the real implementation.
#[cfg(any(test, miri, not(any(target_os = "linux", windows))))]
pub(crate) mod fallback;

#[cfg(any(miri, not(any(target_os = "linux", windows))))]
pub(crate) use fallback::*;
