// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OS and process introspection for the performance sampler.
//!
//! Readings come straight from procfs on Linux (`/proc/stat`,
//! `/proc/self/stat`, `/proc/meminfo`); other platforms report `None` and
//! the sampler simply skips those metrics. Everything sits behind the
//! [`SystemReader`] trait so tests can substitute canned readings.

use std::fmt;

/// Cumulative CPU time for one core, in milliseconds since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub irq: f64,
}

impl CpuTimes {
    pub fn total(&self) -> f64 {
        self.user + self.nice + self.system + self.idle + self.irq
    }
}

/// Cumulative CPU time consumed by this process, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessCpuTimes {
    pub user_ms: f64,
    pub system_ms: f64,
}

impl ProcessCpuTimes {
    pub fn total_ms(&self) -> f64 {
        self.user_ms + self.system_ms
    }
}

/// Point-in-time OS and process readings.
///
/// Each method returns `None` when the platform cannot supply the reading;
/// the sampler treats that as "skip this metric", never as an error.
pub trait SystemReader: Send + Sync {
    /// Per-core cumulative CPU times. Order is stable between calls on the
    /// same boot, but the core count may change (hotplug, container resize).
    fn cpu_times(&self) -> Option<Vec<CpuTimes>>;

    /// Cumulative CPU time consumed by the current process.
    fn process_cpu_times(&self) -> Option<ProcessCpuTimes>;

    /// Resident set size of the current process, in bytes.
    fn resident_memory_bytes(&self) -> Option<u64>;

    /// Memory available to new allocations system-wide, in bytes.
    fn free_memory_bytes(&self) -> Option<u64>;

    /// Total physical memory, in bytes.
    fn total_memory_bytes(&self) -> Option<u64>;
}

/// procfs-backed reader. On non-Linux targets every reading is `None`.
#[derive(Default)]
pub struct ProcReader;

impl ProcReader {
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Debug for ProcReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProcReader")
    }
}

#[cfg(target_os = "linux")]
impl SystemReader for ProcReader {
    fn cpu_times(&self) -> Option<Vec<CpuTimes>> {
        let raw = std::fs::read_to_string("/proc/stat").ok()?;
        let cpus = parse_proc_stat(&raw, clk_tck_ms());
        (!cpus.is_empty()).then_some(cpus)
    }

    fn process_cpu_times(&self) -> Option<ProcessCpuTimes> {
        let raw = std::fs::read_to_string("/proc/self/stat").ok()?;
        let (utime_ticks, stime_ticks, _) = parse_proc_self_stat(&raw)?;
        let tick_ms = clk_tck_ms();
        Some(ProcessCpuTimes {
            user_ms: utime_ticks as f64 * tick_ms,
            system_ms: stime_ticks as f64 * tick_ms,
        })
    }

    fn resident_memory_bytes(&self) -> Option<u64> {
        let raw = std::fs::read_to_string("/proc/self/stat").ok()?;
        let (_, _, rss_pages) = parse_proc_self_stat(&raw)?;
        Some(rss_pages * page_size_bytes())
    }

    fn free_memory_bytes(&self) -> Option<u64> {
        let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
        let (free, _) = parse_meminfo(&raw);
        free
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
        let (_, total) = parse_meminfo(&raw);
        total
    }
}

#[cfg(not(target_os = "linux"))]
impl SystemReader for ProcReader {
    fn cpu_times(&self) -> Option<Vec<CpuTimes>> {
        None
    }

    fn process_cpu_times(&self) -> Option<ProcessCpuTimes> {
        None
    }

    fn resident_memory_bytes(&self) -> Option<u64> {
        None
    }

    fn free_memory_bytes(&self) -> Option<u64> {
        None
    }

    fn total_memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Milliseconds per clock tick.
#[cfg(target_os = "linux")]
fn clk_tck_ms() -> f64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let ticks_per_second = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_second > 0 {
        1000.0 / ticks_per_second as f64
    } else {
        10.0
    }
}

#[cfg(target_os = "linux")]
fn page_size_bytes() -> u64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as u64
    } else {
        4096
    }
}

/// Parse per-core `cpuN` lines from `/proc/stat` into millisecond times.
fn parse_proc_stat(raw: &str, tick_ms: f64) -> Vec<CpuTimes> {
    let mut cpus = Vec::new();
    for line in raw.lines() {
        let Some(rest) = line.strip_prefix("cpu") else {
            continue;
        };
        // Skip the aggregate "cpu " line; keep "cpu0", "cpu1", ...
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let fields: Vec<f64> = rest
            .split_whitespace()
            .skip(1)
            .filter_map(|s| s.parse::<f64>().ok())
            .collect();
        if fields.len() < 4 {
            continue;
        }
        cpus.push(CpuTimes {
            user: fields[0] * tick_ms,
            nice: fields[1] * tick_ms,
            system: fields[2] * tick_ms,
            idle: fields[3] * tick_ms,
            irq: fields.get(5).copied().unwrap_or(0.0) * tick_ms,
        });
    }
    cpus
}

/// Parse `(utime_ticks, stime_ticks, rss_pages)` from `/proc/self/stat`.
///
/// The comm field may contain spaces and parentheses, so fields are counted
/// from the last `)`.
fn parse_proc_self_stat(raw: &str) -> Option<(u64, u64, u64)> {
    let after_comm = &raw[raw.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // after_comm starts at field 3 (state); utime is field 14, stime 15, rss 24
    let utime = fields.get(11)?.parse().ok()?;
    let stime = fields.get(12)?.parse().ok()?;
    let rss_pages = fields.get(21)?.parse().ok()?;
    Some((utime, stime, rss_pages))
}

/// Parse `(available, total)` bytes out of `/proc/meminfo`. `MemAvailable`
/// is preferred over `MemFree` since it accounts for reclaimable caches.
fn parse_meminfo(raw: &str) -> (Option<u64>, Option<u64>) {
    let mut available = None;
    let mut free = None;
    let mut total = None;
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value_kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key {
            "MemAvailable" => available = value_kib,
            "MemFree" => free = value_kib,
            "MemTotal" => total = value_kib,
            _ => {}
        }
    }
    (
        available.or(free).map(|kib| kib * 1024),
        total.map(|kib| kib * 1024),
    )
}
