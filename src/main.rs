use std::sync::Arc;

use nagare_core::config::GlobalConfig;
use nagare_core::ipc::IPCServer;
use nagare_core::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Nagare core daemon starting");

    let cfg = GlobalConfig::load()?;

    // 명시적으로 조립: 레지스트리 검증 실패(포트/모듈 중복)는 여기서 바로 드러난다
    let supervisor = Arc::new(Supervisor::from_config(&cfg)?);

    // Start every configured workflow server, sequentially in registry
    // order. A health timeout is logged and skipped; an OS-level spawn
    // refusal is fatal.
    supervisor.start_all().await?;

    // Graceful shutdown: Ctrl+C / SIGTERM 시 정리
    let shutdown = supervisor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, cleaning up...");
        shutdown.stop_all().await;
        tracing::info!("Cleanup complete, exiting");
        std::process::exit(0);
    });

    let listen_addr = cfg.ipc_listen().to_string();
    let ipc_server = IPCServer::new(supervisor, &listen_addr);
    tracing::info!("Starting IPC server on {}", listen_addr);
    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("Nagare core daemon shutting down");
    Ok(())
}
