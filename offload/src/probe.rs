//! Process memory introspection for the memory budget.
use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Reports the memory usage of the current process.
pub trait MemoryProbe: Send + Sync {
    /// Current resident memory of the process in bytes.
    fn usage(&self) -> u64;

    /// The memory available to the process in bytes, if known.
    fn ceiling(&self) -> Option<u64>;
}

/// A [`MemoryProbe`] backed by the operating system.
///
/// The ceiling is the cgroup memory limit where there is one, and the total system memory
/// otherwise.
pub struct SystemMemory {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl Default for SystemMemory {
    fn default() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|error| tracing::warn!(%error, "Cannot determine the current pid"))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl std::fmt::Debug for SystemMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemory").field("pid", &self.pid).finish()
    }
}

impl SystemMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryProbe for SystemMemory {
    fn usage(&self) -> u64 {
        let (Some(pid), Ok(mut system)) = (self.pid, self.system.lock()) else {
            return 0;
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map_or(0, |process| process.memory())
    }

    fn ceiling(&self) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        system
            .cgroup_limits()
            .map(|limits| limits.total_memory)
            .or(Some(system.total_memory()))
            .filter(|ceiling| *ceiling > 0)
    }
}

/// A [`MemoryProbe`] reporting fixed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMemory {
    pub usage: u64,
    pub ceiling: Option<u64>,
}

impl MemoryProbe for FixedMemory {
    fn usage(&self) -> u64 {
        self.usage
    }

    fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn system_memory_reports_usage_below_ceiling() {
        let probe = SystemMemory::new();

        let usage = probe.usage();

        assert!(usage > 0);
        if let Some(ceiling) = probe.ceiling() {
            assert!(usage < ceiling);
        }
    }
}
