//! 支付对账：附加码分配、交易流水、匹配

pub mod allocator;
pub mod feed;
pub mod matcher;

pub use allocator::CodeAllocator;
pub use feed::{FeedError, HttpFeed, Mutation, TransactionFeed};
pub use matcher::find_match;
