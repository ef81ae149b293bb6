//! Resident memory sampling for the download memory ceiling.

/// Source of the current resident set size.
pub trait MemoryProbe: Send + Sync {
    /// Current resident set size in bytes, or `None` when it cannot be read.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads this process's resident set size from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_bytes(&self) -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            linux_resident_bytes()
        }
        #[cfg(all(unix, not(target_os = "linux")))]
        {
            unix_peak_resident_bytes()
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn linux_resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages = parse_statm_resident_pages(&statm)?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages.saturating_mul(page_size as u64))
}

#[cfg(target_os = "linux")]
fn parse_statm_resident_pages(statm: &str) -> Option<u64> {
    // size resident shared text lib data dt (all in pages)
    statm.split_whitespace().nth(1)?.parse::<u64>().ok()
}

/// Peak RSS is the closest portable figure; it only ever grows, so the
/// ceiling still trips on real growth.
#[cfg(all(unix, not(target_os = "linux")))]
fn unix_peak_resident_bytes() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    let max_rss = u64::try_from(usage.ru_maxrss).ok()?;
    #[cfg(target_os = "macos")]
    {
        Some(max_rss)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Some(max_rss.saturating_mul(1024))
    }
}

/// Memory snapshot taken before a download starts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryBaseline {
    start: Option<u64>,
    max_growth: u64,
}

impl MemoryBaseline {
    pub(crate) fn capture(probe: &dyn MemoryProbe, max_growth: u64) -> Self {
        let start = probe.resident_bytes();
        if start.is_none() {
            tracing::debug!("Resident memory unavailable; memory ceiling disabled");
        }
        Self { start, max_growth }
    }

    /// Current resident size when it is above the ceiling.
    pub(crate) fn exceeded(&self, probe: &dyn MemoryProbe) -> Option<u64> {
        let start = self.start?;
        let current = probe.resident_bytes()?;
        (current > start.saturating_add(self.max_growth)).then_some(current)
    }
}
