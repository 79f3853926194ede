//! Probes backed by procfs, sysfs and standard Linux tools

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{DiskUsage, MemoryUsage, NetworkInterface, SystemProbe};
use crate::{Error, Result};

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";
const THERMAL_ROOT: &str = "/sys/class/thermal";

/// Sensor types that report the CPU package, preferred over other zones
const CPU_SENSORS: &[&str] = &["x86_pkg_temp", "cpu-thermal", "cpu_thermal", "coretemp", "k10temp", "soc_thermal"];

/// Reads metrics from the local Linux host
#[derive(Debug, Clone)]
pub struct LinuxProbe {
    cpu_sample: Duration,
}

impl LinuxProbe {
    /// Create a probe; CPU load is averaged over `cpu_sample`
    #[must_use]
    pub const fn new(cpu_sample: Duration) -> Self {
        Self { cpu_sample }
    }
}

impl Default for LinuxProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl SystemProbe for LinuxProbe {
    async fn cpu_percent(&self) -> Result<f32> {
        let first = read_cpu_times().await?;
        tokio::time::sleep(self.cpu_sample).await;
        let second = read_cpu_times().await?;
        Ok(first.busy_percent_until(&second))
    }

    fn cpu_cores(&self) -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    async fn memory(&self) -> Result<MemoryUsage> {
        let text = read_probe_file(Path::new(PROC_MEMINFO)).await?;
        parse_meminfo(&text)
    }

    async fn disk(&self, path: &str) -> Result<DiskUsage> {
        let output = Command::new("df")
            .args(["-P", "-k", path])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("df failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "df exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_df(&String::from_utf8_lossy(&output.stdout))
    }

    async fn temperature(&self) -> Result<Option<f32>> {
        let mut zones = match tokio::fs::read_dir(THERMAL_ROOT).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Probe(format!("{THERMAL_ROOT}: {e}"))),
        };

        let mut fallback = None;
        while let Some(entry) = zones.next_entry().await? {
            let path = entry.path();
            let is_zone = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("thermal_zone"));
            if !is_zone {
                continue;
            }

            let Ok(raw) = tokio::fs::read_to_string(path.join("temp")).await else {
                continue;
            };
            let Some(celsius) = parse_millidegrees(&raw) else {
                continue;
            };

            let kind = tokio::fs::read_to_string(path.join("type")).await.unwrap_or_default();
            if CPU_SENSORS.contains(&kind.trim()) {
                return Ok(Some(celsius));
            }
            fallback.get_or_insert(celsius);
        }

        Ok(fallback)
    }

    async fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        let output = Command::new("ip")
            .args(["-o", "-4", "addr", "show"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("ip failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Probe(format!("ip exited with {}", output.status)));
        }

        Ok(parse_ip_addr(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn reachable(&self, target: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(target, error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(target, ?timeout, "connectivity probe timed out");
                false
            }
        }
    }

    async fn audio_inputs(&self) -> Result<Vec<String>> {
        tokio::task::spawn_blocking(|| {
            use cpal::traits::{DeviceTrait, HostTrait};

            let host = cpal::default_host();
            let devices = host
                .input_devices()
                .map_err(|e| Error::Probe(format!("audio devices: {e}")))?;
            Ok(devices.filter_map(|d| d.name().ok()).collect())
        })
        .await
        .map_err(|e| Error::Probe(e.to_string()))?
    }
}

async fn read_probe_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Probe(format!("{}: {e}", path.display())))
}

/// Aggregate jiffies from the `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    #[allow(clippy::cast_precision_loss)]
    fn busy_percent_until(&self, later: &Self) -> f32 {
        let total = later.total.saturating_sub(self.total);
        let idle = later.idle.saturating_sub(self.idle);
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle) as f64 * 100.0 / total as f64) as f32
    }
}

async fn read_cpu_times() -> Result<CpuTimes> {
    let text = read_probe_file(Path::new(PROC_STAT)).await?;
    parse_proc_stat(&text)
}

fn parse_proc_stat(text: &str) -> Result<CpuTimes> {
    let line = text
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| Error::Probe("no cpu line in /proc/stat".to_string()))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 4 {
        return Err(Error::Probe("short cpu line in /proc/stat".to_string()));
    }

    // user nice system idle iowait irq softirq steal; guest time is already in user
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().take(8).sum();
    Ok(CpuTimes { idle, total })
}

fn parse_meminfo(text: &str) -> Result<MemoryUsage> {
    let field = |key: &str| {
        text.lines()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next()?.parse::<u64>().ok())
    };

    let total_kib = field("MemTotal").ok_or_else(|| Error::Probe("MemTotal missing".to_string()))?;
    let available_kib = field("MemAvailable")
        .or_else(|| Some(field("MemFree")? + field("Buffers").unwrap_or(0) + field("Cached").unwrap_or(0)))
        .ok_or_else(|| Error::Probe("MemAvailable missing".to_string()))?;

    Ok(MemoryUsage {
        total_kib,
        available_kib,
        swap_total_kib: field("SwapTotal").unwrap_or(0),
        swap_free_kib: field("SwapFree").unwrap_or(0),
    })
}

/// Parse POSIX `df -P -k` output (header plus one line)
fn parse_df(text: &str) -> Result<DiskUsage> {
    let line = text
        .lines()
        .skip(1)
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::Probe("empty df output".to_string()))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(Error::Probe(format!("unexpected df line: {line}")));
    }

    let number = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| Error::Probe(format!("bad df number: {s}")))
    };

    Ok(DiskUsage {
        mount: fields[5..].join(" "),
        total_kib: number(fields[1])?,
        used_kib: number(fields[2])?,
        available_kib: number(fields[3])?,
    })
}

/// Parse `ip -o -4 addr show`, skipping loopback
fn parse_ip_addr(text: &str) -> Vec<NetworkInterface> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.nth(1)?.trim_end_matches(':');
            let mut rest = fields.skip_while(|f| *f != "inet");
            rest.next()?;
            let address = rest.next()?.split('/').next()?;
            Some((name, address))
        })
        .filter(|(name, address)| *name != "lo" && !address.starts_with("127."))
        .map(|(name, address)| NetworkInterface {
            name: name.to_string(),
            address: address.to_string(),
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn parse_millidegrees(raw: &str) -> Option<f32> {
    let value: i64 = raw.trim().parse().ok()?;
    // Some drivers report whole degrees
    let celsius = if value.abs() > 1000 { value as f32 / 1000.0 } else { value as f32 };
    (celsius > -40.0 && celsius < 150.0).then_some(celsius)
}
