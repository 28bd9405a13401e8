use crate::pal::{Probe, ProbeFacade};
use crate::{CpuId, Error};

/// Restricts the current thread to execute only on the given processor.
///
/// This is an optional side effect offered for convenience. Nothing else in this package
/// depends on the binding of any thread.
///
/// # Errors
///
/// * [`Error::InvalidCpu`] if `cpu` is [`CpuId::INVALID`].
/// * [`Error::Affinity`] if the operating system refuses the binding, e.g. because the
///   processor does not exist or is not available to the process.
/// * [`Error::Unsupported`] on platforms without a thread binding mechanism.
///
/// # Example
///
/// ```
/// use cpu_locality::{Topology, bind_current_thread};
///
/// let topology = Topology::current();
/// let first = topology.cpus()[0];
///
/// if let Err(e) = bind_current_thread(first) {
///     println!("Running unbound: {e}");
/// }
/// ```
pub fn bind_current_thread(cpu: CpuId) -> crate::Result<()> {
    bind_current_thread_with(&ProbeFacade::target(), cpu)
}

pub(crate) fn bind_current_thread_with(probe: &ProbeFacade, cpu: CpuId) -> crate::Result<()> {
    if !cpu.is_valid() {
        return Err(Error::InvalidCpu(cpu));
    }

    probe.bind_current_thread(cpu)?;

    tracing::trace!(%cpu, "bound current thread");

    Ok(())
}
