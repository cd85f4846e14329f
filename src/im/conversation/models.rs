//! 会话本地模型定义

use crate::im::message::models::{Message, MessageKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 群成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Owner,
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub role: ParticipantRole,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

/// 会话最新消息摘要（与完整消息列表独立更新）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    pub id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub recalled: bool,
}

impl LastMessageSummary {
    pub fn from_message(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            kind: msg.kind,
            created_at: msg.created_at,
            recalled: msg.recalled,
        }
    }

    /// 会话列表预览文案
    pub fn preview_text(&self) -> String {
        if self.recalled {
            return "[Recalled]".to_string();
        }
        if let Some(label) = self.kind.placeholder() {
            return label.to_string();
        }
        self.content.clone().unwrap_or_default()
    }
}

/// 会话（单聊或群聊）
/// 单聊的 name 由服务端解析为对方昵称
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<LastMessageSummary>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// 摘要指向的是否为该消息
    pub fn last_message_is(&self, message_id: &str) -> bool {
        self.last_message
            .as_ref()
            .is_some_and(|s| s.id == message_id)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}
