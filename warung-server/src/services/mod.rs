//! 外部服务集成 (QR 渲染 / 聊天通道)

pub mod chat;
pub mod qr;

pub use chat::{ChatChannel, ChatError, TelegramChat};
pub use qr::{HttpQrRenderer, QrError, QrRenderer};
