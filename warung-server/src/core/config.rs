use std::path::PathBuf;

/// 服务器配置 - 售货代理的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/warung | 工作目录 (store 文件、二维码、日志) |
/// | STORE_PATH | {WORK_DIR}/store.json | 存储文档路径 |
/// | FEED_BASE_URL | http://localhost:9100 | 交易流水 API 地址 |
/// | QR_RENDERER_URL | http://localhost:9101/render | 二维码渲染服务地址 |
/// | QR_TEMPLATE_PATH | {WORK_DIR}/assets/qris.png | 支付码模板 |
/// | CHAT_API_BASE | https://api.telegram.org | 消息通道 API 地址 |
/// | CHAT_BOT_TOKEN | (空) | 消息通道令牌 |
/// | OPERATOR_CHAT_ID | 0 | 运营者通知频道 |
/// | STORE_TZ | Asia/Jakarta | 买家可见时间的时区 |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/warung CHAT_BOT_TOKEN=123:abc cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储文档、二维码文件、日志
    pub work_dir: String,
    /// 存储文档路径
    pub store_path: PathBuf,
    /// 交易流水 API 地址
    pub feed_base_url: String,
    /// 二维码渲染服务地址
    pub qr_renderer_url: String,
    /// 支付码模板路径 (转发给渲染服务)
    pub qr_template_path: PathBuf,
    /// 消息通道 API 地址
    pub chat_api_base: String,
    /// 消息通道令牌
    pub chat_bot_token: String,
    /// 运营者通知频道 (chat id)
    pub operator_chat_id: i64,
    /// 买家可见时间的时区
    pub timezone: chrono_tz::Tz,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 单笔订单最大数量
    pub max_quantity: u32,
    /// 自动保存间隔 (毫秒)
    pub save_interval_ms: u64,
    /// 轮询策略
    pub poll: PollPolicy,
}

/// 订单轮询的时间策略
///
/// 三层独立的超时：订单自身过期 (`order_ttl_ms`)、轮询次数上限
/// (`max_retries`) 和绝对墙钟上限 (`absolute_timeout_ms`)。
/// 每个 tick 还对流水调用施加 `feed_timeout_ms` 的硬超时。
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// 轮询间隔 (毫秒)
    pub interval_ms: u64,
    /// 轮询次数上限
    pub max_retries: u32,
    /// 订单过期时间 (毫秒, 从创建起算)
    pub order_ttl_ms: i64,
    /// 绝对墙钟上限 (毫秒, 从进入轮询起算)
    pub absolute_timeout_ms: u64,
    /// 单次流水调用超时 (毫秒)
    pub feed_timeout_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            max_retries: 40,
            order_ttl_ms: 10 * 60 * 1000,
            absolute_timeout_ms: 15 * 60 * 1000,
            feed_timeout_ms: 15_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        let work_dir = std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/warung".into());
        let store_path = std::env::var("STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&work_dir).join("store.json"));
        let qr_template_path = std::env::var("QR_TEMPLATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&work_dir).join("assets/qris.png"));
        let timezone = std::env::var("STORE_TZ")
            .ok()
            .and_then(|tz| tz.parse().ok())
            .unwrap_or(chrono_tz::Asia::Jakarta);

        Self {
            work_dir,
            store_path,
            feed_base_url: std::env::var("FEED_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9100".into()),
            qr_renderer_url: std::env::var("QR_RENDERER_URL")
                .unwrap_or_else(|_| "http://localhost:9101/render".into()),
            qr_template_path,
            chat_api_base: std::env::var("CHAT_API_BASE")
                .unwrap_or_else(|_| "https://api.telegram.org".into()),
            chat_bot_token: std::env::var("CHAT_BOT_TOKEN").unwrap_or_default(),
            operator_chat_id: env_parse("OPERATOR_CHAT_ID", 0),
            timezone,
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            max_quantity: env_parse("MAX_QUANTITY", 50),
            save_interval_ms: env_parse("SAVE_INTERVAL_MS", 10_000),
            poll: PollPolicy {
                interval_ms: env_parse("POLL_INTERVAL_MS", 15_000),
                max_retries: env_parse("POLL_MAX_RETRIES", 40),
                order_ttl_ms: env_parse("ORDER_TTL_MS", 10 * 60 * 1000),
                absolute_timeout_ms: env_parse("POLL_ABSOLUTE_TIMEOUT_MS", 15 * 60 * 1000),
                feed_timeout_ms: env_parse("FEED_TIMEOUT_MS", 15_000),
            },
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.store_path = store_path.into();
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 二维码输出目录
    pub fn qr_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("qr")
    }

    /// 日志目录
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// 确保工作目录结构存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(self.qr_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
