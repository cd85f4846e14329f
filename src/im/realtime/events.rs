//! 实时通道事件定义
//!
//! 帧格式为 JSON 文本：`{"event": 名称, "data": 负载, "ackId": 可选}`。
//! 入站事件在边界处一次性收窄为 [`InboundEvent`]，未知事件或负载不合法时直接拒绝。

use crate::im::message::models::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("malformed frame: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// 包装后的新消息通知
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotice {
    pub message: Message,
    /// 服务端顺带下发的未读数（可能只包含部分会话）
    #[serde(default)]
    pub unread_counts: Option<HashMap<String, u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallNotice {
    #[serde(alias = "groupId")]
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default)]
    pub recalled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountNotice {
    #[serde(alias = "groupId")]
    pub conversation_id: String,
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    #[serde(alias = "groupId")]
    pub conversation_id: String,
    pub message_ids: Vec<String>,
    #[serde(alias = "userId")]
    pub reader_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotice {
    pub user_id: String,
    pub online: bool,
    #[serde(default, alias = "activeGroupId")]
    pub active_conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckNotice {
    pub ack_id: String,
    #[serde(default = "default_true")]
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    InitialUnreadCounts(HashMap<String, u32>),
    NotifyMessage(MessageNotice),
    NotifyMessageUpdate(Message),
    NewMessage(Message),
    MessageRecalled(RecallNotice),
    MessageEdited(Message),
    UnreadCountUpdated(UnreadCountNotice),
    MessagesRead(ReadNotice),
    UserStatusUpdate(StatusNotice),
    Ack(AckNotice),
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, EventDecodeError> {
        let frame: RawFrame = serde_json::from_str(text).map_err(EventDecodeError::Frame)?;
        let RawFrame { event, data } = frame;

        fn payload<T: serde::de::DeserializeOwned>(
            event: &str,
            data: serde_json::Value,
        ) -> Result<T, EventDecodeError> {
            serde_json::from_value(data).map_err(|source| EventDecodeError::Payload {
                event: event.to_string(),
                source,
            })
        }

        let parsed = match event.as_str() {
            "initialUnreadCounts" => Self::InitialUnreadCounts(payload(&event, data)?),
            "notifyMessage" => Self::NotifyMessage(payload(&event, data)?),
            "notifyMessageUpdate" => {
                let notice: MessageNotice = payload(&event, data)?;
                Self::NotifyMessageUpdate(notice.message)
            }
            "newMessage" => Self::NewMessage(payload(&event, data)?),
            "messageRecalled" => Self::MessageRecalled(payload(&event, data)?),
            "messageEdited" => Self::MessageEdited(payload(&event, data)?),
            "unreadCountUpdated" => Self::UnreadCountUpdated(payload(&event, data)?),
            "messagesRead" => Self::MessagesRead(payload(&event, data)?),
            "userStatusUpdate" => Self::UserStatusUpdate(payload(&event, data)?),
            "ack" => Self::Ack(payload(&event, data)?),
            _ => return Err(EventDecodeError::UnknownEvent(event)),
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialUnreadCounts(_) => "initialUnreadCounts",
            Self::NotifyMessage(_) => "notifyMessage",
            Self::NotifyMessageUpdate(_) => "notifyMessageUpdate",
            Self::NewMessage(_) => "newMessage",
            Self::MessageRecalled(_) => "messageRecalled",
            Self::MessageEdited(_) => "messageEdited",
            Self::UnreadCountUpdated(_) => "unreadCountUpdated",
            Self::MessagesRead(_) => "messagesRead",
            Self::UserStatusUpdate(_) => "userStatusUpdate",
            Self::Ack(_) => "ack",
        }
    }
}

/// 好友申请处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FriendAction {
    Request,
    Accept,
    Reject,
    Cancel,
}

/// 出站事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum OutboundEvent {
    Register {
        user_id: String,
    },
    Open {
        conversation_id: String,
        user_id: String,
    },
    MarkAsRead {
        conversation_id: String,
        user_id: String,
        message_ids: Vec<String>,
    },
    Send {
        conversation_id: String,
        message_id: String,
    },
    HandleFriend {
        action: FriendAction,
        target_user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    ResetPassword {
        email: String,
    },
}

impl OutboundEvent {
    /// 序列化为帧文本，需要回执时附带 ackId
    pub fn to_frame(&self, ack_id: Option<&str>) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(id), Some(obj)) = (ack_id, value.as_object_mut()) {
            obj.insert("ackId".to_string(), serde_json::Value::from(id));
        }
        serde_json::to_string(&value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Open { .. } => "open",
            Self::MarkAsRead { .. } => "markAsRead",
            Self::Send { .. } => "send",
            Self::HandleFriend { .. } => "handleFriend",
            Self::ResetPassword { .. } => "resetPassword",
        }
    }
}
