//! 会话模块
//!
//! 会话模型、当前会话选择、历史分页和群组接口

pub mod api;
pub mod controller;
pub mod models;
pub mod pagination;

pub use api::{CreateGroupRequest, GroupApi};
pub use controller::{ActiveConversationController, Selection, SelectionEffects};
pub use models::{Conversation, LastMessageSummary, Participant, ParticipantRole};
pub use pagination::{LoadOlderOutcome, PaginationLoader, ScrollAnchor, ViewportMetrics};
