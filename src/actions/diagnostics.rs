//! Full diagnostics report

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{ActionExecutor, ActionResult};
use crate::config::ActionsConfig;
use crate::docker::ContainerManager;
use crate::system::SystemProbe;

#[derive(Debug, Clone)]
struct Thresholds {
    disk_percent: f32,
    memory_percent: f32,
    connectivity_target: String,
    connectivity_timeout: Duration,
}

/// Text report plus the warnings raised while collecting it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub text: String,
    pub warnings: Vec<String>,
}

impl DiagnosticsReport {
    /// Run every probe and assemble the report
    ///
    /// Probe failures are written into the report as unavailable sections.
    pub async fn collect(probe: &dyn SystemProbe, docker: &dyn ContainerManager, config: &ActionsConfig) -> Self {
        let thresholds = Thresholds {
            disk_percent: config.disk_warn_percent,
            memory_percent: config.memory_warn_percent,
            connectivity_target: config.connectivity_target.clone(),
            connectivity_timeout: config.connectivity_timeout,
        };
        Self::collect_with(probe, docker, &thresholds).await
    }

    async fn collect_with(probe: &dyn SystemProbe, docker: &dyn ContainerManager, limits: &Thresholds) -> Self {
        let (cpu, memory, disk, temperature, interfaces, online, version, containers, inputs) = tokio::join!(
            probe.cpu_percent(),
            probe.memory(),
            probe.disk("/"),
            probe.temperature(),
            probe.interfaces(),
            probe.reachable(&limits.connectivity_target, limits.connectivity_timeout),
            docker.version(),
            docker.list_running(),
            probe.audio_inputs(),
        );

        let mut text = String::new();
        let mut warnings = Vec::new();

        let _ = writeln!(text, "=== Diagnostics {} ===", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

        let _ = writeln!(text, "\n[CPU]");
        match cpu {
            Ok(load) => {
                let _ = writeln!(text, "Load: {load:.1}%");
            }
            Err(e) => {
                let _ = writeln!(text, "Load: unavailable ({e})");
            }
        }
        let _ = writeln!(text, "Cores: {}", probe.cpu_cores());
        if let Ok(Some(celsius)) = temperature {
            let _ = writeln!(text, "Temperature: {celsius:.1}°C");
        }

        let _ = writeln!(text, "\n[Memory]");
        match memory {
            Ok(mem) => {
                let _ = writeln!(
                    text,
                    "Used: {:.1}% of {} MiB",
                    mem.used_percent(),
                    mem.total_kib / 1024
                );
                if mem.swap_total_kib > 0 {
                    let _ = writeln!(text, "Swap: {:.1}% of {} MiB", mem.swap_percent(), mem.swap_total_kib / 1024);
                } else {
                    let _ = writeln!(text, "Swap: none");
                }
                if mem.used_percent() >= limits.memory_percent {
                    warnings.push(format!("Memory usage at {:.0}%", mem.used_percent()));
                }
            }
            Err(e) => {
                let _ = writeln!(text, "Unavailable ({e})");
            }
        }

        let _ = writeln!(text, "\n[Disk]");
        match disk {
            Ok(disk) => {
                let _ = writeln!(
                    text,
                    "{}: {:.1}% used, {} MiB free",
                    disk.mount,
                    disk.used_percent(),
                    disk.available_kib / 1024
                );
                if disk.used_percent() >= limits.disk_percent {
                    warnings.push(format!("Disk usage at {:.0}%", disk.used_percent()));
                }
            }
            Err(e) => {
                let _ = writeln!(text, "Unavailable ({e})");
            }
        }

        let _ = writeln!(text, "\n[Network]");
        match interfaces {
            Ok(list) if list.is_empty() => {
                let _ = writeln!(text, "No active interfaces");
            }
            Ok(list) => {
                for iface in &list {
                    let _ = writeln!(text, "{}: {}", iface.name, iface.address);
                }
            }
            Err(e) => {
                let _ = writeln!(text, "Interfaces unavailable ({e})");
            }
        }
        let _ = writeln!(
            text,
            "Internet ({}): {}",
            limits.connectivity_target,
            if online { "reachable" } else { "unreachable" }
        );
        if !online {
            warnings.push("Internet unreachable".to_string());
        }

        let _ = writeln!(text, "\n[Docker]");
        match version {
            Ok(version) => {
                let _ = writeln!(text, "Version: {version}");
            }
            Err(e) => {
                let _ = writeln!(text, "Unavailable ({e})");
            }
        }
        if let Ok(containers) = containers {
            let _ = writeln!(text, "Running containers: {}", containers.len());
            for container in &containers {
                let _ = writeln!(text, "  {} ({})", container.name, container.status);
            }
        }

        let _ = writeln!(text, "\n[Audio]");
        match inputs {
            Ok(devices) if devices.is_empty() => {
                let _ = writeln!(text, "No input devices");
                warnings.push("No audio input devices".to_string());
            }
            Ok(devices) => {
                for device in &devices {
                    let _ = writeln!(text, "Input: {device}");
                }
            }
            Err(e) => {
                let _ = writeln!(text, "Inputs unavailable ({e})");
            }
        }

        if !warnings.is_empty() {
            let _ = writeln!(text, "\n[Warnings]");
            for warning in &warnings {
                let _ = writeln!(text, "- {warning}");
            }
        }

        Self { text, warnings }
    }

    /// Write the report into `dir` under a timestamped name
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or written.
    pub async fn save(&self, dir: &Path) -> crate::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "diagnostics_{}.txt",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        tokio::fs::write(&path, &self.text).await?;
        Ok(path)
    }
}

/// Collect, save and summarize a diagnostics report
pub struct DiagnosticsAction {
    probe: Arc<dyn SystemProbe>,
    docker: Arc<dyn ContainerManager>,
    thresholds: Thresholds,
    report_dir: Option<PathBuf>,
}

impl DiagnosticsAction {
    /// Create the executor
    #[must_use]
    pub fn new(probe: Arc<dyn SystemProbe>, docker: Arc<dyn ContainerManager>, config: &ActionsConfig) -> Self {
        Self {
            probe,
            docker,
            thresholds: Thresholds {
                disk_percent: config.disk_warn_percent,
                memory_percent: config.memory_warn_percent,
                connectivity_target: config.connectivity_target.clone(),
                connectivity_timeout: config.connectivity_timeout,
            },
            report_dir: config.report_dir.clone(),
        }
    }
}

#[async_trait]
impl ActionExecutor for DiagnosticsAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        let report =
            DiagnosticsReport::collect_with(self.probe.as_ref(), self.docker.as_ref(), &self.thresholds).await;

        let mut response = if report.warnings.is_empty() {
            "Diagnostics complete. No warnings.".to_string()
        } else {
            format!("Diagnostics complete with {} warning(s).", report.warnings.len())
        };

        let saved = match &self.report_dir {
            Some(dir) => match report.save(dir).await {
                Ok(path) => {
                    tracing::info!(path = %path.display(), warnings = report.warnings.len(), "diagnostics report saved");
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed to save diagnostics report");
                    response.push_str(" The report could not be saved.");
                    None
                }
            },
            None => None,
        };

        ActionResult::ok(response).with_data(serde_json::json!({
            "report_path": saved.map(|p| p.display().to_string()),
            "warnings": report.warnings,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::docker::{ContainerState, ContainerSummary};
    use crate::system::{DiskUsage, MemoryUsage, NetworkInterface};

    struct Probe {
        disk_used: u64,
        online: bool,
    }

    #[async_trait]
    impl SystemProbe for Probe {
        async fn cpu_percent(&self) -> crate::Result<f32> {
            Ok(12.5)
        }

        fn cpu_cores(&self) -> usize {
            4
        }

        async fn memory(&self) -> crate::Result<MemoryUsage> {
            Ok(MemoryUsage {
                total_kib: 8 * 1024 * 1024,
                available_kib: 4 * 1024 * 1024,
                swap_total_kib: 0,
                swap_free_kib: 0,
            })
        }

        async fn disk(&self, path: &str) -> crate::Result<DiskUsage> {
            Ok(DiskUsage {
                mount: path.to_string(),
                total_kib: 100,
                used_kib: self.disk_used,
                available_kib: 100 - self.disk_used,
            })
        }

        async fn temperature(&self) -> crate::Result<Option<f32>> {
            Err(Error::Probe("no sensors".into()))
        }

        async fn interfaces(&self) -> crate::Result<Vec<NetworkInterface>> {
            Ok(vec![NetworkInterface {
                name: "eth0".into(),
                address: "10.0.0.2".into(),
            }])
        }

        async fn reachable(&self, _target: &str, _timeout: Duration) -> bool {
            self.online
        }

        async fn audio_inputs(&self) -> crate::Result<Vec<String>> {
            Ok(vec!["USB Mic".into()])
        }
    }

    struct NoDocker;

    #[async_trait]
    impl ContainerManager for NoDocker {
        async fn list_running(&self) -> crate::Result<Vec<ContainerSummary>> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }

        async fn inspect(&self, _name: &str) -> crate::Result<ContainerState> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }

        async fn start(&self, _name: &str) -> crate::Result<()> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }

        async fn stop(&self, _name: &str) -> crate::Result<()> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }

        async fn restart(&self, _name: &str) -> crate::Result<()> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }

        async fn version(&self) -> crate::Result<String> {
            Err(Error::DockerUnavailable("daemon down".into()))
        }
    }

    fn config(report_dir: Option<PathBuf>) -> ActionsConfig {
        let mut config = crate::Config::default().actions;
        config.report_dir = report_dir;
        config
    }

    #[tokio::test]
    async fn test_healthy_report_has_no_warnings() {
        let probe = Probe {
            disk_used: 40,
            online: true,
        };
        let report = DiagnosticsReport::collect(&probe, &NoDocker, &config(None)).await;

        assert!(report.warnings.is_empty());
        assert!(report.text.contains("Cores: 4"));
        assert!(report.text.contains("eth0: 10.0.0.2"));
        assert!(report.text.contains("Input: USB Mic"));
        assert!(report.text.contains("[Docker]\nUnavailable"));
    }

    #[tokio::test]
    async fn test_thresholds_raise_warnings() {
        let probe = Probe {
            disk_used: 95,
            online: false,
        };
        let report = DiagnosticsReport::collect(&probe, &NoDocker, &config(None)).await;

        assert_eq!(report.warnings, vec!["Disk usage at 95%", "Internet unreachable"]);
        assert!(report.text.contains("[Warnings]"));
    }

    #[tokio::test]
    async fn test_action_saves_report() {
        let dir = tempfile::tempdir().unwrap();
        let action = DiagnosticsAction::new(
            Arc::new(Probe {
                disk_used: 95,
                online: true,
            }),
            Arc::new(NoDocker),
            &config(Some(dir.path().join("reports"))),
        );

        let result = action.execute(None).await;
        assert!(result.success);
        assert_eq!(result.response, "Diagnostics complete with 1 warning(s).");

        let path = result.data.as_ref().unwrap()["report_path"].as_str().unwrap().to_string();
        assert!(path.contains("diagnostics_"));
        let saved = std::fs::read_to_string(path).unwrap();
        assert!(saved.contains("Disk usage at 95%"));
    }

    #[tokio::test]
    async fn test_unwritable_report_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let action = DiagnosticsAction::new(
            Arc::new(Probe {
                disk_used: 10,
                online: true,
            }),
            Arc::new(NoDocker),
            &config(Some(blocker.join("reports"))),
        );

        let result = action.execute(None).await;
        assert!(result.success);
        assert_eq!(
            result.response,
            "Diagnostics complete. No warnings. The report could not be saved."
        );
    }
}
