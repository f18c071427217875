//! 应用状态
//!
//! 组装所有服务组件，注册后台任务。

use std::sync::Arc;

use anyhow::Context;

use crate::core::{BackgroundTasks, Config, TaskKind};
use crate::orders::OrderManager;
use crate::payment::{CodeAllocator, HttpFeed, TransactionFeed};
use crate::services::{ChatChannel, HttpQrRenderer, QrRenderer, TelegramChat};
use crate::store::{PersistCoordinator, Store};
use crate::utils::logger::cleanup_old_logs;

/// Rolled log files older than this are removed by the cleanup task.
const LOG_RETENTION_DAYS: u64 = 14;
const LOG_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

/// 应用状态 - 持有所有组件的所有权
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub persist: PersistCoordinator,
    pub allocator: Arc<CodeAllocator>,
    pub orders: Arc<OrderManager>,
}

impl AppState {
    /// 初始化所有组件
    ///
    /// 失败即退出：存储文件损坏或工作目录不可写都不允许继续启动。
    pub fn initialize(config: &Config, tasks: &BackgroundTasks) -> anyhow::Result<Self> {
        config
            .ensure_work_dir_structure()
            .context("Failed to create work directory structure")?;

        let store = Store::open(&config.store_path)
            .with_context(|| format!("Failed to open store at {}", config.store_path.display()))?;

        let persist = PersistCoordinator::new();
        let allocator = Arc::new(CodeAllocator::new());

        let feed: Arc<dyn TransactionFeed> = Arc::new(HttpFeed::new(config.feed_base_url.clone()));
        let chat: Arc<dyn ChatChannel> = Arc::new(TelegramChat::new(
            config.chat_api_base.clone(),
            config.chat_bot_token.clone(),
        ));
        let qr: Arc<dyn QrRenderer> = Arc::new(HttpQrRenderer::new(
            config.qr_renderer_url.clone(),
            config.qr_template_path.clone(),
            config.qr_dir(),
        ));

        let orders = Arc::new(OrderManager::new(
            config.clone(),
            store.clone(),
            persist.clone(),
            Arc::clone(&allocator),
            feed,
            chat,
            qr,
            tasks.shutdown_token(),
        ));

        tracing::info!(
            environment = %config.environment,
            store = %config.store_path.display(),
            "Application state initialized"
        );

        Ok(Self {
            config: config.clone(),
            store,
            persist,
            allocator,
            orders,
        })
    }

    /// 注册所有后台任务
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let shutdown = tasks.shutdown_token();

        tasks.spawn(
            "persist_writer",
            TaskKind::Worker,
            self.persist
                .clone()
                .run_writer(self.store.clone(), shutdown.clone()),
        );

        tasks.spawn(
            "persist_interval",
            TaskKind::Periodic,
            self.persist
                .clone()
                .run_interval(self.config.save_interval_ms, shutdown.clone()),
        );

        tasks.spawn(
            "surcharge_sweeper",
            TaskKind::Periodic,
            Arc::clone(&self.allocator).run_sweeper(shutdown.clone()),
        );

        let log_dir = self.config.log_dir();
        tasks.spawn("log_cleanup", TaskKind::Periodic, async move {
            let mut ticker = tokio::time::interval(LOG_CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(dir) = log_dir.to_str()
                            && let Err(e) = cleanup_old_logs(dir, LOG_RETENTION_DAYS)
                        {
                            tracing::warn!(error = %e, "Log cleanup failed");
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }
}
