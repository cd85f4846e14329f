pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    client::{ChatClient, ClientConfig},
    conversation::{Conversation, LoadOlderOutcome, ScrollAnchor, ViewportMetrics},
    error::ClientError,
    listener::{ChatListener, EmptyChatListener},
    message::{Message, MessageKind, OutgoingAttachment},
    push::NotificationPayload,
};
