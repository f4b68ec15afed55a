//! Memory monitoring for the batch loop.
//!
//! The pipeline gates each batch on resident memory. Under Rust ownership a
//! batch's working set is dropped at scope exit, so the reclamation hint is
//! advisory only — it logs, and leaves reclamation to the allocator.

/// Source of resident-memory readings for the batch gate.
pub trait MemoryMonitor: Send + Sync {
    /// Current resident set size in bytes. A reading of 0 disables the gate.
    fn resident_bytes(&self) -> u64;

    /// Ask the runtime to reclaim what it can. Advisory.
    fn reclaim_hint(&self) {
        tracing::debug!("memory reclamation hint issued");
    }
}

/// Reads resident memory from `/proc/self/status` (`VmRSS`).
///
/// On platforms without procfs this reports 0, which disables the memory
/// gate rather than guessing.
pub struct ProcessMemory;

impl MemoryMonitor for ProcessMemory {
    fn resident_bytes(&self) -> u64 {
        read_vmrss_bytes().unwrap_or(0)
    }
}

// VmRSS is reported in kB regardless of the kernel's page size.
#[cfg(target_os = "linux")]
fn read_vmrss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vmrss(&status)
}

#[cfg(target_os = "linux")]
fn parse_vmrss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn read_vmrss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn process_memory_reports_nonzero_on_linux() {
        assert!(ProcessMemory.resident_bytes() > 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn vmrss_parses_kb_into_bytes() {
        let status = "Name:\tfaqgen\nVmPeak:\t  20000 kB\nVmRSS:\t  12344 kB\nThreads:\t4\n";
        assert_eq!(parse_vmrss(status), Some(12344 * 1024));
        assert_eq!(parse_vmrss("Name:\tfaqgen\n"), None);
    }

    #[test]
    fn reclaim_hint_is_safe_to_call() {
        ProcessMemory.reclaim_hint();
    }
}
