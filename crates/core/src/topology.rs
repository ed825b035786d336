//! CPU topology queries used for arena scaling and CPU-indexed selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of CPU count and current-CPU information
pub trait CpuTopology: Send + Sync + std::fmt::Debug {
    /// Number of online processors
    fn online_cpus(&self) -> usize;

    /// Processor the calling thread is running on
    fn current_cpu(&self) -> usize;
}

/// Topology of the running host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTopology;

impl CpuTopology for SystemTopology {
    fn online_cpus(&self) -> usize {
        num_cpus::get()
    }

    #[cfg(target_os = "linux")]
    fn current_cpu(&self) -> usize {
        // SAFETY: sched_getcpu has no preconditions
        let cpu = unsafe { libc::sched_getcpu() };
        usize::try_from(cpu).unwrap_or(0)
    }

    #[cfg(not(target_os = "linux"))]
    fn current_cpu(&self) -> usize {
        0
    }
}

/// Fixed topology with a settable current CPU, for tests and simulations
#[derive(Debug)]
pub struct FixedTopology {
    cpus: usize,
    current: AtomicUsize,
}

impl FixedTopology {
    /// Topology reporting `cpus` online processors
    #[must_use]
    pub const fn new(cpus: usize) -> Self {
        Self {
            cpus,
            current: AtomicUsize::new(0),
        }
    }

    /// Change the CPU reported by [`CpuTopology::current_cpu`]
    pub fn set_current_cpu(&self, cpu: usize) {
        self.current.store(cpu, Ordering::Relaxed);
    }
}

impl CpuTopology for FixedTopology {
    fn online_cpus(&self) -> usize {
        self.cpus
    }

    fn current_cpu(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_topology() {
        let topology = SystemTopology;
        let cpus = topology.online_cpus();
        assert!(cpus >= 1);
        assert!(topology.current_cpu() < cpus.max(1024));
    }

    #[test]
    fn test_fixed_topology() {
        let topology = FixedTopology::new(4);
        assert_eq!(topology.online_cpus(), 4);
        topology.set_current_cpu(3);
        assert_eq!(topology.current_cpu(), 3);
    }
}
