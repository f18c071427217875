//! Warung Server - 数字账号小店自动售货代理
//!
//! # 架构概述
//!
//! 本模块是售货代理的主入口，提供以下核心功能：
//!
//! - **订单状态机** (`orders`): 每个买家一个待付订单的完整生命周期
//! - **支付对账** (`payment`): 附加码分配器、交易流水匹配
//! - **存储** (`store`): 整文件 JSON 文档 + 单飞写入协调器
//! - **外部协作方** (`services`): 二维码渲染、消息通道
//!
//! # 模块结构
//!
//! ```text
//! warung-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── store/         # 存储文档、持久化协调
//! ├── payment/       # 附加码、交易流水、匹配
//! ├── orders/        # 订单状态机
//! ├── services/      # 二维码、消息通道
//! └── utils/         # 日志
//! ```

pub mod core;
pub mod orders;
pub mod payment;
pub mod services;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use crate::core::{AppState, BackgroundTasks, Config, TaskKind};
pub use orders::{OrderAck, OrderError, OrderManager};
pub use payment::{CodeAllocator, FeedError, HttpFeed, Mutation, TransactionFeed};
pub use services::{ChatChannel, ChatError, QrError, QrRenderer};
pub use store::{PersistCoordinator, Store, StoreError};

// Re-export logger functions
pub use utils::logger::{cleanup_old_logs, init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
 _      __
| | /| / /___ _ ____ __ __ ___  ___ _
| |/ |/ // _ `// __// // // _ \/ _ `/
|__/|__/ \_,_//_/   \_,_//_//_/\_, /
                              /___/
    "#
    );
}

/// 设置运行环境 (dotenv)
///
/// 在日志初始化之前调用，保证 RUST_LOG 等变量已加载。
pub fn setup_environment() -> anyhow::Result<()> {
    // .env 不存在不是错误
    let _ = dotenv::dotenv();
    Ok(())
}
