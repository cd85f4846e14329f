//! 消息本地模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    MultiImage,
    Video,
    /// 普通文件
    Raw,
}

impl MessageKind {
    /// 会话列表里展示的占位文案（文本消息返回 None，直接展示正文）
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image => Some("[Image]"),
            MessageKind::MultiImage => Some("[Images]"),
            MessageKind::Video => Some("[Video]"),
            MessageKind::Raw => Some("[File]"),
        }
    }

    /// 按 MIME 推断附件类型
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MessageKind::Image
        } else if mime.starts_with("video/") {
            MessageKind::Video
        } else {
            MessageKind::Raw
        }
    }
}

/// 附件引用：单个 URL，或多图时的一组 URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub urls: Vec<String>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

/// 转发来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedFrom {
    pub message_id: String,
    #[serde(alias = "groupId")]
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: String,
}

/// 聊天消息，可直接从服务器 JSON 反序列化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// 服务端分配的消息 ID
    pub id: String,
    #[serde(alias = "groupId")]
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub recalled: bool,
    #[serde(default)]
    pub recalled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// 编辑前的原文
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub forwarded_from: Option<ForwardedFrom>,
    /// 已读用户（集合语义，保持插入顺序）
    #[serde(default)]
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    /// 将同 ID 的新版本合并到当前消息
    ///
    /// 必填字段直接覆盖；Option 字段仅在新值为 Some 时覆盖；
    /// 已读集合取并集；撤回状态只进不退。
    pub fn merge_from(&mut self, incoming: Message) {
        let was_recalled = self.recalled;
        let prev_recalled_at = self.recalled_at;
        let mut readers = std::mem::take(&mut self.read_by);

        self.conversation_id = incoming.conversation_id;
        self.sender_id = incoming.sender_id;
        self.kind = incoming.kind;
        self.created_at = incoming.created_at;
        if incoming.content.is_some() {
            self.content = incoming.content;
        }
        if incoming.attachment.is_some() {
            self.attachment = incoming.attachment;
        }
        if incoming.edited_at.is_some() {
            self.edited_at = incoming.edited_at;
        }
        if incoming.original_content.is_some() {
            self.original_content = incoming.original_content;
        }
        if incoming.forwarded_from.is_some() {
            self.forwarded_from = incoming.forwarded_from;
        }
        if incoming.updated_at.is_some() {
            self.updated_at = incoming.updated_at;
        }

        self.recalled = was_recalled || incoming.recalled;
        self.recalled_at = incoming.recalled_at.or(prev_recalled_at);

        for reader in incoming.read_by {
            if !readers.contains(&reader) {
                readers.push(reader);
            }
        }
        self.read_by = readers;
    }

    /// 标记某用户已读，返回是否有变化
    pub fn add_reader(&mut self, reader_id: &str) -> bool {
        if self.read_by.iter().any(|r| r == reader_id) {
            return false;
        }
        self.read_by.push(reader_id.to_string());
        true
    }

    pub fn is_read_by(&self, reader_id: &str) -> bool {
        self.read_by.iter().any(|r| r == reader_id)
    }
}
