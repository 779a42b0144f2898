//! Host counter readers
//!
//! Reads the kernel's text interfaces under `/proc` and `/sys`:
//! - `/proc/stat` for aggregate CPU time
//! - `/proc/meminfo` for memory and swap
//! - `/proc/net/route` and `/proc/net/dev` for the default interface
//! - `/proc/diskstats` for completed writes
//! - `/sys/class/thermal` and `/sys/devices/system/cpu` for temperature and frequency
//!
//! Every reader returns `Option` so a missing or malformed source degrades
//! only that one figure.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::models::InterfaceKind;

/// Roots of the proc and sys filesystems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
        }
    }
}

impl HostPaths {
    pub fn new(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    pub fn thermal_zone(&self) -> PathBuf {
        self.sys_root.join("class/thermal/thermal_zone0/temp")
    }

    fn cpufreq(&self, file: &str) -> PathBuf {
        self.sys_root
            .join("devices/system/cpu/cpu0/cpufreq")
            .join(file)
    }

    fn net_class(&self, iface: &str) -> PathBuf {
        self.sys_root.join("class/net").join(iface)
    }
}

/// Aggregate CPU time counters in jiffies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat`
pub fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();

    if values.len() < 4 {
        return None;
    }

    // user nice system idle iowait irq softirq steal ...
    let idle = values[3].checked_add(values.get(4).copied().unwrap_or(0))?;
    let total = values
        .iter()
        .take(8)
        .try_fold(0u64, |sum, &v| sum.checked_add(v))?;
    Some(CpuTimes { idle, total })
}

/// CPU utilisation in percent between two counter snapshots
pub fn cpu_usage_between(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    let idle = after.idle.saturating_sub(before.idle);
    if total == 0 {
        return 0.0;
    }
    let busy = total.saturating_sub(idle);
    (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Memory figures in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parse `/proc/meminfo`; values are reported in kB
pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut available = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    let mut swap_total = 0u64;
    let mut swap_free = 0u64;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        // Overflowing values are treated like unparsable ones
        let Some(bytes) = value
            .parse::<u64>()
            .ok()
            .and_then(|kb| kb.checked_mul(1024))
        else {
            continue;
        };
        match key {
            "MemTotal:" => total = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            "MemFree:" => free = bytes,
            "Buffers:" => buffers = bytes,
            "Cached:" => cached = bytes,
            "SwapTotal:" => swap_total = bytes,
            "SwapFree:" => swap_free = bytes,
            _ => {}
        }
    }

    let total = total?;
    // Older kernels lack MemAvailable
    let available = available
        .unwrap_or_else(|| free.saturating_add(buffers).saturating_add(cached))
        .min(total);
    Some(MemInfo {
        total,
        available,
        swap_total,
        swap_free,
    })
}

/// Name of the interface carrying the default route
pub fn parse_default_route(content: &str) -> Option<String> {
    content.lines().skip(1).find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        (destination == "00000000").then(|| iface.to_string())
    })
}

/// Dropped plus errored packets for `iface` from `/proc/net/dev`
pub fn parse_packets_lost(content: &str, iface: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (name, stats) = line.split_once(':')?;
        if name.trim() != iface {
            return None;
        }
        let values: Vec<u64> = stats
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if values.len() < 12 {
            return None;
        }
        // rx: bytes packets errs drop ... tx: bytes packets errs drop
        Some(
            values[2]
                .saturating_add(values[3])
                .saturating_add(values[10])
                .saturating_add(values[11]),
        )
    })
}

/// Completed writes summed over the named block devices
pub fn parse_diskstats_writes(content: &str, devices: &[String]) -> u64 {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 || !devices.iter().any(|d| d == fields[2]) {
                return None;
            }
            fields[7].parse::<u64>().ok()
        })
        .fold(0u64, u64::saturating_add)
}

/// Classify an interface as wifi or ethernet
pub fn classify_interface(iface: &str, has_wireless_dir: bool) -> InterfaceKind {
    if has_wireless_dir || iface.starts_with("wl") {
        InterfaceKind::Wifi
    } else {
        InterfaceKind::Ethernet
    }
}

async fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

pub async fn read_cpu_times(paths: &HostPaths) -> Option<CpuTimes> {
    let content = fs::read_to_string(paths.proc_root.join("stat")).await.ok()?;
    parse_cpu_times(&content)
}

pub async fn read_meminfo(paths: &HostPaths) -> Option<MemInfo> {
    let content = fs::read_to_string(paths.proc_root.join("meminfo"))
        .await
        .ok()?;
    parse_meminfo(&content)
}

/// Synchronous total-memory lookup used once at construction
pub fn read_total_memory_sync(paths: &HostPaths) -> Option<u64> {
    let content = std::fs::read_to_string(paths.proc_root.join("meminfo")).ok()?;
    parse_meminfo(&content).map(|m| m.total)
}

/// Temperature of the first thermal zone in degrees Celsius
pub async fn read_temperature(paths: &HostPaths) -> Option<f64> {
    let millidegrees: f64 = read_trimmed(&paths.thermal_zone()).await?.parse().ok()?;
    Some(millidegrees / 1000.0)
}

/// Current and maximum frequency of cpu0 in MHz
pub async fn read_frequency(paths: &HostPaths) -> Option<(u32, u32)> {
    let current_khz: u64 = read_trimmed(&paths.cpufreq("scaling_cur_freq"))
        .await?
        .parse()
        .ok()?;
    let current = (current_khz / 1000) as u32;
    let max = match read_trimmed(&paths.cpufreq("cpuinfo_max_freq")).await {
        Some(v) => v.parse::<u64>().map(|khz| (khz / 1000) as u32).unwrap_or(current),
        None => current,
    };
    Some((current, max))
}

pub async fn read_default_interface(paths: &HostPaths) -> Option<String> {
    let content = fs::read_to_string(paths.proc_root.join("net/route"))
        .await
        .ok()?;
    parse_default_route(&content)
}

pub async fn interface_kind(paths: &HostPaths, iface: &str) -> InterfaceKind {
    let wireless = fs::metadata(paths.net_class(iface).join("wireless"))
        .await
        .is_ok();
    classify_interface(iface, wireless)
}

/// Link speed in Mbps; `None` when the driver reports none (-1)
pub async fn read_interface_speed(paths: &HostPaths, iface: &str) -> Option<u32> {
    let speed: i64 = read_trimmed(&paths.net_class(iface).join("speed"))
        .await?
        .parse()
        .ok()?;
    u32::try_from(speed).ok().filter(|s| *s > 0)
}

pub async fn read_packets_lost(paths: &HostPaths, iface: &str) -> Option<u64> {
    let content = fs::read_to_string(paths.proc_root.join("net/dev"))
        .await
        .ok()?;
    parse_packets_lost(&content, iface)
}

/// Physical block devices listed under `/sys/block`
pub async fn list_block_devices(paths: &HostPaths) -> Vec<String> {
    let mut devices = Vec::new();
    let Ok(mut entries) = fs::read_dir(paths.sys_root.join("block")).await else {
        return devices;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram")) {
            devices.push(name);
        }
    }
    devices.sort();
    devices
}

pub async fn read_write_count(paths: &HostPaths) -> Option<u64> {
    let devices = list_block_devices(paths).await;
    if devices.is_empty() {
        return None;
    }
    let content = fs::read_to_string(paths.proc_root.join("diskstats"))
        .await
        .ok()?;
    Some(parse_diskstats_writes(&content, &devices))
}
