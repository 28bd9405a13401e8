//! Probes the topology of the current machine and writes it to the terminal, together with
//! every metric derived from it. Run with `RUST_LOG=cpu_locality=debug` to also see what the
//! probe found and what it had to guess.
//!
//! Pass `--no-smt` to only consider one logical processor per physical core.

use std::env;

use cpu_locality::{Platform, Topology};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let topology = Topology::current();
    println!("{topology}");

    let mut platform = Platform::new(topology);

    if env::args().any(|arg| arg == "--no-smt") {
        platform.disable_smt();
    }

    println!("{platform}");
}
