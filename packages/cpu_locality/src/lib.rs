#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Cache-aware parallel code needs to know which processors share what. Two threads that share
//! a level 1 cache can hand data to each other almost for free, while two threads in different
//! NUMA nodes pay for every cache line that crosses between them. This package discovers the
//! processor, cache and NUMA topology of a machine and turns it into simple metrics that a
//! scheduler can act on.
//!
//! This is part of the [Folo project](https://github.com/folo-rs/folo) that provides mechanisms for
//! high-performance hardware-aware programming in Rust.
//!
//! # Topology
//!
//! A [`Topology`] is a tree that goes from the host through NUMA nodes and shared caches down to
//! single logical processors. It is probed from the operating system once per process via
//! [`Topology::current()`] and is immutable afterwards.
//!
//! ```
//! use cpu_locality::Topology;
//!
//! let topology = Topology::current();
//! println!("{} processors", topology.cpu_count());
//! println!("{topology}");
//! ```
//!
//! # Metrics
//!
//! A [`Platform`] takes a working set of processors from a topology and assigns each a compact
//! index. For every pair of processors it knows their [distance][Platform::distance] and
//! [proximity][Platform::proximity], and for every processor the [roundtrip][Platform::roundtrip]
//! order in which to visit its peers, nearest first.
//!
//! ```
//! use cpu_locality::Platform;
//!
//! let mut platform = Platform::current();
//!
//! // One logical processor per physical core.
//! platform.disable_smt();
//!
//! let nearest_peer = platform.roundtrip(0).get(1);
//! println!("Processor 0 should first share work with {nearest_peer:?}");
//! ```
//!
//! The working set can be narrowed down at any time via [`Platform::use_sys_cpu()`],
//! [`Platform::filter_sys_cpu()`] and [`Platform::disable_smt()`], or configured up front via
//! [`PlatformBuilder`].
//!
//! # Thread binding
//!
//! To actually run a thread on a specific processor, use [`bind_current_thread()`] or
//! [`Platform::bind_current_thread()`].
//!
//! # Operating system compatibility
//!
//! * On Linux, the topology is read from sysfs. If NUMA information is not available, physical
//!   packages stand in for NUMA nodes.
//! * On Windows, the topology is read via `GetLogicalProcessorInformationEx`.
//! * On other operating systems, the topology is a flat list of as many processors as the
//!   standard library reports as available parallelism, and thread binding is not supported.
//!
//! Information the operating system does not reveal is left out of the topology instead of
//! causing errors, so the metrics are always available.

mod affinity;
mod detect;
mod error;
mod platform;
mod platform_builder;
mod policy;
mod primitive_types;
mod topology;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use affinity::*;
pub use detect::*;
pub use error::*;
pub use platform::*;
pub use platform_builder::*;
pub use policy::*;
pub use primitive_types::*;
pub use topology::*;

mod pal;
