//! Workflow server supervision.
//!
//! The `Supervisor` owns one child process per running workflow server and
//! drives the start / health-check / stop protocol. Servers start in registry
//! order, sequentially; the running-set mutex is held across each mutating
//! operation so the dedup check and the insert are a single read-modify-write.

pub mod error;
pub mod process;
pub mod state_machine;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use crate::config::{GlobalConfig, HealthSettings, LauncherSettings, SupervisorSettings};
use crate::health::{wait_for_health, HealthProber, HttpHealthProber};
use crate::registry::WorkflowRegistry;

use error::SupervisorError;
use process::ManagedChild;
use state_machine::{State, StateMachine};

/// Snapshot of one configured server, as reported over IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub module: String,
    pub port: u16,
    pub state: State,
    pub pid: Option<u32>,
}

pub struct Supervisor {
    registry: WorkflowRegistry,
    launcher: LauncherSettings,
    health: HealthSettings,
    stop_grace: Duration,
    prober: Arc<dyn HealthProber>,
    /// module → live child. 엔트리는 헬스 체크를 통과한 서버에만 존재한다.
    running: Mutex<HashMap<String, ManagedChild>>,
    states: Mutex<HashMap<String, StateMachine>>,
}

impl Supervisor {
    pub fn new(
        registry: WorkflowRegistry,
        launcher: LauncherSettings,
        health: HealthSettings,
        settings: SupervisorSettings,
        prober: Arc<dyn HealthProber>,
    ) -> Self {
        Self {
            registry,
            launcher,
            health,
            stop_grace: settings.stop_grace(),
            prober,
            running: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Supervisor wired from the global config, probing over HTTP.
    pub fn from_config(cfg: &GlobalConfig) -> Result<Self, SupervisorError> {
        let registry = WorkflowRegistry::from_config(cfg)?;
        let health = cfg.health();
        let prober = Arc::new(HttpHealthProber::new(health.probe_timeout()));
        Ok(Self::new(registry, cfg.launcher(), health, cfg.supervisor(), prober))
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Port for a workflow module; pure registry lookup.
    pub fn port_for(&self, module: &str) -> Option<u16> {
        self.registry.port_for(module)
    }

    /// Start every configured server, in registry order. Best-effort: a
    /// server that never becomes healthy is logged and skipped; only an
    /// OS-level spawn refusal aborts.
    pub async fn start_all(&self) -> Result<(), SupervisorError> {
        for config in self.registry.configs() {
            self.start_server(config).await?;
        }
        Ok(())
    }

    /// Start a single workflow server.
    ///
    /// No-op if the module already has a running entry. On a health-check
    /// timeout the child is killed, nothing is recorded, and `Ok` is
    /// returned — the module is simply absent from the running-set.
    pub async fn start_server(
        &self,
        config: &crate::registry::WorkflowConfig,
    ) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().await;

        if running.contains_key(&config.module) {
            tracing::info!("Server for {} already running", config.module);
            return Ok(());
        }

        tracing::info!(
            "Starting server for {} on port {}",
            config.module,
            config.port
        );
        self.set_state(&config.module, State::Starting).await;

        let child = match ManagedChild::spawn(&self.launcher, config) {
            Ok(child) => child,
            Err(e) => {
                self.set_state(&config.module, State::Failed).await;
                return Err(e);
            }
        };

        if !wait_for_health(self.prober.as_ref(), config.port, &self.health).await {
            tracing::error!("Server for {} failed to start within timeout", config.module);
            child.force_kill().await;
            self.set_state(&config.module, State::Failed).await;
            return Ok(());
        }

        tracing::info!(
            "Server for {} started successfully on port {} (PID {})",
            config.module,
            config.port,
            child.pid()
        );
        self.set_state(&config.module, State::Running).await;
        running.insert(config.module.clone(), child);
        Ok(())
    }

    /// Stop one running server, gracefully then forcefully.
    pub async fn stop_server(&self, module: &str) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().await;
        let child = running
            .remove(module)
            .ok_or_else(|| SupervisorError::NotRunning(module.to_string()))?;

        tracing::info!("Stopping server for {}", module);
        self.set_state(module, State::Stopping).await;
        if !child.stop(self.stop_grace).await {
            tracing::warn!("Server for {} force killed after grace period", module);
        }
        self.set_state(module, State::Stopped).await;
        Ok(())
    }

    /// Stop every running server. The running-set is empty afterward even if
    /// some children missed their graceful-stop deadline; a second call is a
    /// no-op.
    pub async fn stop_all(&self) {
        let mut running = self.running.lock().await;
        for (module, child) in running.drain() {
            tracing::info!("Stopping server for {}", module);
            self.set_state(&module, State::Stopping).await;
            if !child.stop(self.stop_grace).await {
                tracing::warn!("Server for {} force killed after grace period", module);
            }
            self.set_state(&module, State::Stopped).await;
        }
    }

    /// Modules with a live entry in the running-set.
    pub async fn running_modules(&self) -> Vec<String> {
        let running = self.running.lock().await;
        running.keys().cloned().collect()
    }

    /// Status snapshot of every configured server, in registry order.
    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let running = self.running.lock().await;
        let states = self.states.lock().await;

        self.registry
            .configs()
            .iter()
            .map(|config| ServerStatus {
                name: config.name.clone(),
                module: config.module.clone(),
                port: config.port,
                state: states
                    .get(&config.module)
                    .map(|sm| sm.state.clone())
                    .unwrap_or(State::Stopped),
                pid: running.get(&config.module).map(|child| child.pid()),
            })
            .collect()
    }

    async fn set_state(&self, module: &str, to: State) {
        let mut states = self.states.lock().await;
        let sm = states.entry(module.to_string()).or_default();
        if let Err(e) = sm.transition(to) {
            // 상태 기록은 보고용 메타데이터 — 전이 오류로 동작을 막지 않는다
            tracing::debug!("State bookkeeping for {}: {}", module, e);
        }
    }
}

// ─── Shared instance ─────────────────────────────────────────

/// Lazily constructed, process-wide supervisor handle.
///
/// `get_or_start` runs construction and `start_all` exactly once even when
/// many callers hit it concurrently; every caller gets the same `Arc`. A
/// failed construction leaves the cell empty, so the next access retries
/// instead of reusing a half-initialized instance.
pub struct SharedSupervisor {
    cell: OnceCell<Arc<Supervisor>>,
}

impl SharedSupervisor {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_start<F, Fut>(&self, build: F) -> Result<Arc<Supervisor>, SupervisorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Supervisor, SupervisorError>>,
    {
        self.cell
            .get_or_try_init(|| async move {
                let supervisor = Arc::new(build().await?);
                supervisor.start_all().await?;
                register_shutdown_hook(supervisor.clone());
                Ok(supervisor)
            })
            .await
            .cloned()
    }

    /// Already-constructed instance, if any. No side effects.
    pub fn get(&self) -> Option<Arc<Supervisor>> {
        self.cell.get().cloned()
    }
}

impl Default for SharedSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: SharedSupervisor = SharedSupervisor::new();

/// Process-wide supervisor built from `GlobalConfig::load()`; constructed and
/// started on first access. Prefer wiring a `Supervisor` explicitly where the
/// composition root allows it.
pub async fn global() -> Result<Arc<Supervisor>, SupervisorError> {
    GLOBAL
        .get_or_start(|| async {
            let cfg = GlobalConfig::load()?;
            Supervisor::from_config(&cfg)
        })
        .await
}

/// Teardown on normal process exit: registered once per constructed
/// supervisor, safe to run when no server ever started.
fn register_shutdown_hook(supervisor: Arc<Supervisor>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("Shutdown signal received, stopping workflow servers");
        supervisor.stop_all().await;
        std::process::exit(0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Probe;
    use crate::registry::{WorkflowConfig, WorkflowRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always-ready prober that counts how often it was asked.
    struct ReadyProber {
        probes: AtomicUsize,
    }

    impl ReadyProber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                probes: AtomicUsize::new(0),
            })
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProber for ReadyProber {
        async fn probe(&self, _port: u16) -> Probe {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Probe::Ready
        }
    }

    struct NeverReadyProber;

    #[async_trait]
    impl HealthProber for NeverReadyProber {
        async fn probe(&self, _port: u16) -> Probe {
            Probe::NotReady
        }
    }

    fn fast_health() -> HealthSettings {
        HealthSettings {
            timeout_secs: 0.2,
            interval_secs: 0.02,
            probe_timeout_secs: 0.05,
        }
    }

    fn fast_stop() -> SupervisorSettings {
        SupervisorSettings { stop_grace_secs: 0.3 }
    }

    fn config(module: &str, port: u16) -> WorkflowConfig {
        WorkflowConfig {
            name: module.to_string(),
            module: module.to_string(),
            port,
        }
    }

    fn empty_supervisor() -> Supervisor {
        Supervisor::new(
            WorkflowRegistry::new(Vec::new()).unwrap(),
            LauncherSettings::default(),
            fast_health(),
            fast_stop(),
            Arc::new(NeverReadyProber),
        )
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates_and_records_nothing() {
        let launcher = LauncherSettings {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..LauncherSettings::default()
        };
        let supervisor = Supervisor::new(
            WorkflowRegistry::new(vec![config("audio", 9005)]).unwrap(),
            launcher,
            fast_health(),
            fast_stop(),
            ReadyProber::new(),
        );

        let result = supervisor.start_all().await;
        assert!(matches!(result, Err(SupervisorError::SpawnFailed { .. })));
        assert!(supervisor.running_modules().await.is_empty());

        let statuses = supervisor.statuses().await;
        assert_eq!(statuses[0].state, State::Failed);
        assert_eq!(statuses[0].pid, None);
    }

    #[tokio::test]
    async fn test_port_for_delegates_to_registry() {
        let supervisor = Supervisor::new(
            WorkflowRegistry::new(crate::registry::default_configs()).unwrap(),
            LauncherSettings::default(),
            fast_health(),
            fast_stop(),
            Arc::new(NeverReadyProber),
        );
        assert_eq!(supervisor.port_for("published_nodes_workflow"), Some(8005));
        assert_eq!(supervisor.port_for("unknown_module"), None);
    }

    #[tokio::test]
    async fn test_stop_all_on_empty_set_is_noop() {
        let supervisor = empty_supervisor();
        supervisor.stop_all().await;
        supervisor.stop_all().await;
        assert!(supervisor.running_modules().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_server_not_running() {
        let supervisor = empty_supervisor();
        let result = supervisor.stop_server("ghost").await;
        assert!(matches!(result, Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_shared_supervisor_concurrent_first_touch() {
        let shared = Arc::new(SharedSupervisor::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                shared
                    .get_or_start(move || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok(empty_supervisor())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1, "construction must run once");
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[tokio::test]
    async fn test_shared_supervisor_retries_after_failed_construction() {
        let shared = SharedSupervisor::new();

        // 첫 번째 초기화: spawn 실패 → 셀은 비어 있어야 한다
        let launcher = LauncherSettings {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..LauncherSettings::default()
        };
        let result = shared
            .get_or_start(move || async move {
                Ok(Supervisor::new(
                    WorkflowRegistry::new(vec![config("audio", 9005)]).unwrap(),
                    launcher,
                    fast_health(),
                    fast_stop(),
                    ReadyProber::new(),
                ))
            })
            .await;
        assert!(result.is_err());
        assert!(shared.get().is_none(), "failed construction must not poison the cell");

        // 다음 접근은 재시도 가능
        let retried = shared.get_or_start(|| async { Ok(empty_supervisor()) }).await;
        assert!(retried.is_ok());
        assert!(shared.get().is_some());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::time::Instant;

        fn write_script(dir: &Path, body: &str) -> LauncherSettings {
            let path = dir.join("fake_server.sh");
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            LauncherSettings {
                interpreter: path.to_string_lossy().to_string(),
                ..LauncherSettings::default()
            }
        }

        fn sleeper_supervisor(
            dir: &Path,
            configs: Vec<WorkflowConfig>,
            prober: Arc<dyn HealthProber>,
        ) -> Supervisor {
            let launcher = write_script(dir, "#!/bin/sh\nexec sleep 30\n");
            Supervisor::new(
                WorkflowRegistry::new(configs).unwrap(),
                launcher,
                fast_health(),
                fast_stop(),
                prober,
            )
        }

        #[tokio::test]
        async fn test_idempotent_start() {
            let dir = tempfile::tempdir().unwrap();
            let prober = ReadyProber::new();
            let supervisor =
                sleeper_supervisor(dir.path(), vec![config("audio", 9005)], prober.clone());

            let audio = config("audio", 9005);
            supervisor.start_server(&audio).await.unwrap();
            let pid_first = supervisor.statuses().await[0].pid;
            assert!(pid_first.is_some());

            // 두 번째 시작은 no-op: 프로세스도 헬스 체크도 추가로 발생하지 않는다
            supervisor.start_server(&audio).await.unwrap();
            assert_eq!(supervisor.running_modules().await.len(), 1);
            assert_eq!(prober.probes(), 1);
            assert_eq!(supervisor.statuses().await[0].pid, pid_first);

            supervisor.stop_all().await;
        }

        #[tokio::test]
        async fn test_health_timeout_records_nothing() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = sleeper_supervisor(
                dir.path(),
                vec![config("audio", 9005)],
                Arc::new(NeverReadyProber),
            );

            let started = Instant::now();
            supervisor.start_all().await.unwrap();
            let elapsed = started.elapsed();

            assert!(supervisor.running_modules().await.is_empty());
            assert_eq!(supervisor.statuses().await[0].state, State::Failed);
            // timeout(0.2s) + interval 정도에서 반드시 반환
            assert!(elapsed < Duration::from_secs(2), "start took {:?}", elapsed);
        }

        #[tokio::test]
        async fn test_best_effort_start_all_continues_past_failure() {
            let dir = tempfile::tempdir().unwrap();

            // audio만 준비되는 프로버
            struct OnlyAudio;
            #[async_trait]
            impl HealthProber for OnlyAudio {
                async fn probe(&self, port: u16) -> Probe {
                    if port == 9005 { Probe::Ready } else { Probe::NotReady }
                }
            }

            let supervisor = sleeper_supervisor(
                dir.path(),
                vec![config("video", 9006), config("audio", 9005)],
                Arc::new(OnlyAudio),
            );

            supervisor.start_all().await.unwrap();

            // video는 실패해도 audio 시작을 막지 않는다
            assert_eq!(supervisor.running_modules().await, vec!["audio".to_string()]);
            supervisor.stop_all().await;
        }

        #[tokio::test]
        async fn test_teardown_completeness_with_stubborn_children() {
            let dir = tempfile::tempdir().unwrap();
            let launcher = write_script(
                dir.path(),
                "#!/bin/sh\ntrap '' TERM\nwhile :; do sleep 1; done\n",
            );
            let supervisor = Supervisor::new(
                WorkflowRegistry::new(vec![config("audio", 9005), config("video", 9006)]).unwrap(),
                launcher,
                fast_health(),
                fast_stop(),
                ReadyProber::new(),
            );

            supervisor.start_all().await.unwrap();
            assert_eq!(supervisor.running_modules().await.len(), 2);
            // trap 설치 대기
            tokio::time::sleep(Duration::from_millis(200)).await;

            supervisor.stop_all().await;

            // 강제 종료 경로를 거쳤더라도 running-set은 비어 있다
            assert!(supervisor.running_modules().await.is_empty());
            for status in supervisor.statuses().await {
                assert_eq!(status.state, State::Stopped);
                assert_eq!(status.pid, None);
            }
        }

        #[tokio::test]
        async fn test_stop_server_single_module() {
            let dir = tempfile::tempdir().unwrap();
            let supervisor = sleeper_supervisor(
                dir.path(),
                vec![config("audio", 9005), config("video", 9006)],
                ReadyProber::new(),
            );

            supervisor.start_all().await.unwrap();
            supervisor.stop_server("audio").await.unwrap();

            assert_eq!(supervisor.running_modules().await, vec!["video".to_string()]);
            supervisor.stop_all().await;
        }
    }
}
