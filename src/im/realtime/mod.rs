//! 实时通道：事件定义、WebSocket 传输和状态适配

pub mod adapter;
pub mod events;
pub mod transport;

pub use adapter::RealtimeEventAdapter;
pub use events::{FriendAction, InboundEvent, OutboundEvent};
pub use transport::{RealtimeConnection, RealtimeLink, RealtimeSink};
