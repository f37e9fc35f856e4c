use serde::Deserialize;
use std::time::Duration;

use crate::registry::WorkflowConfig;

/// 데몬 전역 설정 — config/nagare.toml
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GlobalConfig {
    pub ipc_listen: Option<String>,
    pub launcher: Option<LauncherSettings>,
    pub health: Option<HealthSettings>,
    pub supervisor: Option<SupervisorSettings>,
    pub servers: Option<Vec<WorkflowConfig>>,
}

/// How workflow server children are launched.
///
/// The spawn contract is `<interpreter> -m <framework> dev <entry> --port <port>`.
#[derive(Deserialize, Debug, Clone)]
pub struct LauncherSettings {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_framework")]
    pub framework: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    pub working_dir: Option<String>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            framework: default_framework(),
            entry: default_entry(),
            working_dir: None,
        }
    }
}

/// Bounds for the startup readiness poll.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct HealthSettings {
    /// Total time allowed for a server to become healthy.
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: f64,
    /// Delay between consecutive probes.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: f64,
    /// Per-request timeout of a single probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            interval_secs: default_poll_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl HealthSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Grace period before a stop escalates to a forceful kill.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: f64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl SupervisorSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs_f64(self.stop_grace_secs)
    }
}

pub const DEFAULT_IPC_LISTEN: &str = "127.0.0.1:57575";
const CONFIG_PATH: &str = "config/nagare.toml";

fn default_interpreter() -> String {
    if cfg!(windows) { "python" } else { "python3" }.to_string()
}

fn default_framework() -> String {
    "fastapi".to_string()
}

fn default_entry() -> String {
    "workflow_server.py".to_string()
}

fn default_health_timeout() -> f64 {
    30.0
}

fn default_poll_interval() -> f64 {
    0.5
}

fn default_probe_timeout() -> f64 {
    2.0
}

fn default_stop_grace() -> f64 {
    5.0
}

impl GlobalConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(CONFIG_PATH)
    }

    /// 설정 파일이 없으면 기본값으로 동작한다. 깨진 파일은 경고 후 기본값.
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path).unwrap_or_default();
        match toml::from_str(&s) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}, using defaults", path, e);
                Ok(Self::default())
            }
        }
    }

    pub fn ipc_listen(&self) -> &str {
        self.ipc_listen.as_deref().unwrap_or(DEFAULT_IPC_LISTEN)
    }

    pub fn launcher(&self) -> LauncherSettings {
        self.launcher.clone().unwrap_or_default()
    }

    pub fn health(&self) -> HealthSettings {
        self.health.unwrap_or_default()
    }

    pub fn supervisor(&self) -> SupervisorSettings {
        self.supervisor.unwrap_or_default()
    }
}
