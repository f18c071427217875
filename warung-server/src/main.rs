use warung_server::{
    AppState, BackgroundTasks, Config, init_logger_with_file, print_banner, setup_environment,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 设置环境 (dotenv)
    setup_environment()?;

    // 打印横幅
    print_banner();

    // 2. 加载配置并准备工作目录
    let config = Config::from_env();
    config.ensure_work_dir_structure()?;

    // 3. 初始化日志 (控制台 + 按日滚动文件)
    let log_dir = config.log_dir();
    init_logger_with_file(
        std::env::var("RUST_LOG").ok().as_deref(),
        log_dir.to_str(),
    );

    tracing::info!("🏪 Warung Server starting...");

    // 4. 初始化应用状态并启动后台任务
    let mut tasks = BackgroundTasks::new();
    let state = AppState::initialize(&config, &tasks)?;
    state.start_background_tasks(&mut tasks);

    tracing::info!(
        tasks = tasks.len(),
        environment = %config.environment,
        "Warung Server ready"
    );

    // 5. 等待终止信号，随后优雅关闭 (关闭时落盘一次)
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tasks.shutdown().await;
    tracing::info!("Warung Server stopped");

    Ok(())
}
