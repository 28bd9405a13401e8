//! Probes the machine the tests run on and verifies that whatever it finds satisfies the
//! structural guarantees of the topology and the metrics derived from it.

use std::sync::Arc;
use std::thread;

use cpu_locality::{CpuId, FilterMode, Platform, Topology};

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn detected_topology_is_well_formed() {
    let topology = cpu_locality::detect();

    assert!(topology.cpu_count() >= 1);

    topology.for_each_group(|_, group, path| {
        if group.children().is_empty() {
            assert!(group.is_cpu(), "leaf must have exactly one processor");
        } else {
            let mut from_children = Vec::new();
            for &child in group.children() {
                from_children.extend_from_slice(topology.group(child).cpus());
            }

            assert_eq!(from_children, group.cpus());
        }

        let enclosing = path
            .iter()
            .filter_map(|&ancestor| topology.group(ancestor).cache_level())
            .min();

        if let (Some(level), Some(enclosing)) = (group.cache_level(), enclosing) {
            assert!(level <= enclosing, "cache levels must not increase towards leaves");
        }
    });
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn current_platform_metrics_are_consistent() {
    let platform = Platform::current();
    let n = platform.cpu_count();

    assert_eq!(n, Topology::current().cpu_count());
    assert!(platform.numa_count() >= 1);
    assert!(platform.max_cache_line() > 0);

    for i in 0..n {
        assert_eq!(platform.distance(i, i), 0);
        assert_eq!(platform.roundtrip(i).first(), Some(&i));

        let mut trip = platform.roundtrip(i).to_vec();
        trip.sort_unstable();
        assert_eq!(trip, (0..n).collect::<Vec<_>>());

        for j in 0..n {
            assert_eq!(platform.distance(i, j), platform.distance(j, i));
            assert!(platform.proximity(i, i) >= platform.proximity(i, j));
        }
    }
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn filtering_real_platform() {
    let mut platform = Platform::new(Topology::current());
    let all = platform.cpu_count();

    platform.disable_smt();
    assert!(platform.cpu_count() <= all);

    let first = platform.cpu_id(0);
    platform.filter_sys_cpu(&[first], FilterMode::Keep);
    assert_eq!(platform.cpu_ids(), &[first]);

    platform.use_sys_cpu(&[]);
    assert_eq!(platform.cpu_count(), all);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn topology_is_shared_between_platforms() {
    let first = Platform::current();
    let second = Platform::current();

    assert!(Arc::ptr_eq(first.topology(), second.topology()));
}

#[cfg(any(target_os = "linux", windows))]
#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn bind_thread_to_processors() {
    let platform = Platform::current();
    let mut bound = 0;

    for cpu in 0..platform.cpu_count() {
        let platform = platform.clone();

        // A fresh thread per processor, so the binding does not leak into the test harness.
        let result = thread::spawn(move || platform.bind_current_thread(cpu))
            .join()
            .unwrap();

        // The process may be restricted to a subset of the processors that are online.
        match result {
            Ok(()) => bound += 1,
            Err(cpu_locality::Error::Affinity { .. }) => {}
            Err(e) => panic!("unexpected binding error: {e}"),
        }
    }

    assert!(bound >= 1);
}

#[test]
fn binding_invalid_processor_fails() {
    let result = cpu_locality::bind_current_thread(CpuId::INVALID);

    assert!(matches!(result, Err(cpu_locality::Error::InvalidCpu(_))));
}
