//! Read-only operating system probes
//!
//! Every probe is independent: one failing never prevents the others from
//! answering, and callers turn failures into "unavailable" text.

mod linux;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use linux::LinuxProbe;

use crate::Result;

/// Physical and swap memory, in KiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryUsage {
    pub total_kib: u64,
    pub available_kib: u64,
    pub swap_total_kib: u64,
    pub swap_free_kib: u64,
}

impl MemoryUsage {
    /// Share of memory in use
    #[must_use]
    pub fn used_percent(&self) -> f32 {
        percent(self.total_kib.saturating_sub(self.available_kib), self.total_kib)
    }

    /// Share of swap in use
    #[must_use]
    pub fn swap_percent(&self) -> f32 {
        percent(self.swap_total_kib.saturating_sub(self.swap_free_kib), self.swap_total_kib)
    }
}

/// Usage of one mounted filesystem, in KiB
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub mount: String,
    pub total_kib: u64,
    pub used_kib: u64,
    pub available_kib: u64,
}

impl DiskUsage {
    /// Share of the filesystem in use
    #[must_use]
    pub fn used_percent(&self) -> f32 {
        percent(self.used_kib, self.used_kib + self.available_kib)
    }
}

/// A non-loopback interface with an IPv4 address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub address: String,
}

/// OS metrics boundary
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// CPU busy percentage over a short sample
    async fn cpu_percent(&self) -> Result<f32>;

    /// Logical CPU count
    fn cpu_cores(&self) -> usize;

    /// Memory and swap
    async fn memory(&self) -> Result<MemoryUsage>;

    /// Usage of the filesystem holding `path`
    async fn disk(&self, path: &str) -> Result<DiskUsage>;

    /// CPU temperature in °C, `None` when no sensor exists
    async fn temperature(&self) -> Result<Option<f32>>;

    /// Interfaces with an IPv4 address, loopback excluded
    async fn interfaces(&self) -> Result<Vec<NetworkInterface>>;

    /// Whether a TCP connection to `target` succeeds within `timeout`
    async fn reachable(&self, target: &str, timeout: Duration) -> bool;

    /// Names of audio input devices
    async fn audio_inputs(&self) -> Result<Vec<String>>;
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / whole as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_percentages() {
        let mem = MemoryUsage {
            total_kib: 1000,
            available_kib: 250,
            swap_total_kib: 0,
            swap_free_kib: 0,
        };
        assert!((mem.used_percent() - 75.0).abs() < f32::EPSILON);
        assert!(mem.swap_percent().abs() < f32::EPSILON);
    }

    #[test]
    fn test_disk_percent_uses_user_visible_space() {
        let disk = DiskUsage {
            mount: "/".to_string(),
            total_kib: 1100,
            used_kib: 400,
            available_kib: 600,
        };
        assert!((disk.used_percent() - 40.0).abs() < 0.001);
    }
}
