//! 在线状态
//!
//! 由实时通道的 `userStatusUpdate` 事件维护。

use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 用户相对某个会话的在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlineStatus {
    /// 正在查看该会话
    Active,
    /// 已连接但未查看该会话
    Online,
    Offline,
}

#[derive(Debug, Default, Clone)]
pub struct PresenceState {
    online: HashSet<String>,
    active: HashMap<String, HashSet<String>>,
}

impl PresenceState {
    /// 应用一次状态更新
    ///
    /// 用户同一时间只会查看一个会话，因此先从所有会话中移除再加入。
    pub fn apply(&mut self, user_id: &str, online: bool, active_conversation: Option<&str>) {
        for viewers in self.active.values_mut() {
            viewers.remove(user_id);
        }
        self.active.retain(|_, viewers| !viewers.is_empty());

        if !online {
            self.online.remove(user_id);
            return;
        }
        self.online.insert(user_id.to_string());
        if let Some(conv) = active_conversation {
            self.active
                .entry(conv.to_string())
                .or_default()
                .insert(user_id.to_string());
        }
    }

    pub fn status_of(&self, user_id: &str, conversation_id: &str) -> OnlineStatus {
        let viewing = self
            .active
            .get(conversation_id)
            .is_some_and(|v| v.contains(user_id));
        if viewing {
            OnlineStatus::Active
        } else if self.online.contains(user_id) {
            OnlineStatus::Online
        } else {
            OnlineStatus::Offline
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub fn online_users(&self) -> &HashSet<String> {
        &self.online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_state_status() {
        let mut p = PresenceState::default();
        assert_eq!(p.status_of("u1", "g1"), OnlineStatus::Offline);

        p.apply("u1", true, None);
        assert_eq!(p.status_of("u1", "g1"), OnlineStatus::Online);

        p.apply("u1", true, Some("g1"));
        assert_eq!(p.status_of("u1", "g1"), OnlineStatus::Active);
        assert_eq!(p.status_of("u1", "g2"), OnlineStatus::Online);

        p.apply("u1", true, Some("g2"));
        assert_eq!(p.status_of("u1", "g1"), OnlineStatus::Online);

        p.apply("u1", false, None);
        assert_eq!(p.status_of("u1", "g2"), OnlineStatus::Offline);
        assert!(!p.is_online("u1"));
    }

    #[test]
    fn duplicate_updates_are_harmless() {
        let mut p = PresenceState::default();
        p.apply("u1", true, Some("g1"));
        p.apply("u1", true, Some("g1"));
        assert_eq!(p.status_of("u1", "g1"), OnlineStatus::Active);
        assert_eq!(p.online_users().len(), 1);
    }
}
