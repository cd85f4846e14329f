//! 好友本地模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 好友申请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FriendRequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

/// 好友申请
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    #[serde(alias = "senderId")]
    pub from_user_id: String,
    #[serde(alias = "receiverId")]
    pub to_user_id: String,
    #[serde(default)]
    pub status: FriendRequestStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl FriendRequest {
    /// 别人发给我的申请
    pub fn is_incoming(&self, me: &str) -> bool {
        self.to_user_id == me
    }

    pub fn is_pending(&self) -> bool {
        self.status == FriendRequestStatus::Pending
    }

    /// 对方的用户 ID
    pub fn counterpart(&self, me: &str) -> &str {
        if self.is_incoming(me) {
            &self.from_user_id
        } else {
            &self.to_user_id
        }
    }
}
