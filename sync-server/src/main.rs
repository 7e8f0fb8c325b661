use sync_server::{BackgroundTasks, Config, ServerState, init_logger_with_file};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 加载环境与日志
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_logger_with_file(&config.log_level, config.log_json, config.log_dir.as_deref())?;

    tracing::info!("Order sync server starting...");

    // 2. 初始化引擎状态
    let state = ServerState::initialize(&config).await;
    tracing::info!(epoch = %state.epoch(), "Engine initialized");

    // 3. 启动后台任务（投递、持久化、通知、对账）
    let mut tasks = BackgroundTasks::new();
    state.start_background_tasks(&mut tasks);

    // 4. 启动 TCP 服务器
    let tcp_server = state.tcp_server(tasks.shutdown_token());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = tcp_server.run().await {
            tracing::error!("TCP server error: {}", e);
        }
    });

    // 5. 等待关闭信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tasks.shutdown().await;
    let _ = server_handle.await;

    tracing::info!("Order sync server stopped");
    Ok(())
}
