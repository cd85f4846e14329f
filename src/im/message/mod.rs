//! 消息模块
//!
//! 消息模型、内存消息列表、HTTP 接口和发送管线

pub mod api;
pub mod models;
pub mod send;
pub mod store;

pub use api::{MessageApi, MessageBackend, MessagePage};
pub use models::{Attachment, ForwardedFrom, Message, MessageKind};
pub use send::{OutgoingAttachment, SendPipeline};
pub use store::{MessageStore, PageCursor, PageMode};
