//! 订单生命周期 (创建 / 轮询 / 结算 / 取消)

mod manager;

pub use manager::{OrderAck, OrderError, OrderManager};
