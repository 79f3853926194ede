//! System status and network executors

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ActionExecutor, ActionResult};
use crate::system::SystemProbe;

/// CPU, memory, disk and temperature summary
///
/// Each probe runs independently; a failed one is reported as unavailable
/// and the rest still answer.
pub struct SystemStatusAction {
    probe: Arc<dyn SystemProbe>,
}

impl SystemStatusAction {
    /// Create the executor
    #[must_use]
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl ActionExecutor for SystemStatusAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        let (cpu, memory, disk, temperature) = tokio::join!(
            self.probe.cpu_percent(),
            self.probe.memory(),
            self.probe.disk("/"),
            self.probe.temperature(),
        );

        let mut parts = Vec::with_capacity(4);
        let mut data = serde_json::Map::new();

        match cpu {
            Ok(cpu) => {
                parts.push(format!("CPU {cpu:.0}%"));
                data.insert("cpu_percent".into(), serde_json::json!(cpu));
            }
            Err(e) => {
                tracing::warn!(error = %e, "cpu probe failed");
                parts.push("CPU unavailable".to_string());
            }
        }

        match memory {
            Ok(mem) => {
                parts.push(format!("Memory {:.0}%", mem.used_percent()));
                data.insert("memory_percent".into(), serde_json::json!(mem.used_percent()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory probe failed");
                parts.push("Memory unavailable".to_string());
            }
        }

        match disk {
            Ok(disk) => {
                parts.push(format!("Disk {:.0}%", disk.used_percent()));
                data.insert("disk_percent".into(), serde_json::json!(disk.used_percent()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "disk probe failed");
                parts.push("Disk unavailable".to_string());
            }
        }

        match temperature {
            Ok(Some(celsius)) => {
                parts.push(format!("Temperature {celsius:.1}°C"));
                data.insert("temperature_c".into(), serde_json::json!(celsius));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "temperature probe failed"),
        }

        ActionResult::ok(format!("{}.", parts.join(", "))).with_data(serde_json::Value::Object(data))
    }
}

/// Interface count plus an outbound reachability probe
pub struct NetworkCheckAction {
    probe: Arc<dyn SystemProbe>,
    target: String,
    timeout: Duration,
}

impl NetworkCheckAction {
    /// Create the executor probing `target` (host:port)
    #[must_use]
    pub fn new(probe: Arc<dyn SystemProbe>, target: String, timeout: Duration) -> Self {
        Self { probe, target, timeout }
    }
}

#[async_trait]
impl ActionExecutor for NetworkCheckAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        let (interfaces, online) = tokio::join!(
            self.probe.interfaces(),
            self.probe.reachable(&self.target, self.timeout),
        );

        let reach = if online { "Internet reachable." } else { "Internet unreachable." };

        let (summary, count) = match interfaces {
            Ok(list) if list.is_empty() => ("No active network connections found.".to_string(), Some(0)),
            Ok(list) => (format!("Network active. {} interface(s) connected.", list.len()), Some(list.len())),
            Err(e) => {
                tracing::warn!(error = %e, "interface probe failed");
                ("Network interfaces unavailable.".to_string(), None)
            }
        };

        ActionResult::ok(format!("{summary} {reach}"))
            .with_data(serde_json::json!({ "interfaces": count, "online": online, "target": self.target }))
    }
}
