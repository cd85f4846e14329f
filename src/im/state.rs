//! 客户端聊天状态
//!
//! 所有内存状态（消息、会话列表、未读数、在线状态、当前会话）只在这里修改。
//! 外部通过 [`StoreHandle::dispatch`] 提交 [`StoreCommand`]，每条命令在一次加锁内
//! 同步执行完毕，锁不会跨越 `.await`。

use crate::im::conversation::controller::{ActiveConversationController, SelectionEffects};
use crate::im::conversation::models::{Conversation, LastMessageSummary};
use crate::im::message::models::Message;
use crate::im::message::store::{MessageStore, PageMode};
use crate::im::presence::PresenceState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// 状态变更命令
#[derive(Debug, Clone)]
pub enum StoreCommand {
    AppendOrReplace {
        conversation_id: String,
        message: Message,
    },
    MarkRecalled {
        conversation_id: String,
        message_id: String,
        recalled_at: DateTime<Utc>,
    },
    MarkRead {
        conversation_id: String,
        message_ids: Vec<String>,
        reader_id: String,
    },
    LoadPage {
        conversation_id: String,
        messages: Vec<Message>,
        next_cursor: Option<String>,
        has_more: bool,
        mode: PageMode,
    },
    Remove {
        conversation_id: String,
        message_id: String,
    },
    /// 用服务器返回的列表替换会话列表（保留已知未读数）
    SetConversations(Vec<Conversation>),
    UpsertConversation(Conversation),
    /// 无条件把摘要更新为该消息（新消息、自己发送成功）
    SetSummary {
        conversation_id: String,
        message: Message,
    },
    /// 仅当该消息就是会话最新消息时刷新摘要（编辑）
    RefreshSummaryIfLast {
        conversation_id: String,
        message: Message,
    },
    /// 摘要指向该消息时只置撤回标记，其余字段保留
    FlagSummaryRecalled {
        conversation_id: String,
        message_id: String,
    },
    ReplaceUnreadCounts(HashMap<String, u32>),
    SetUnread {
        conversation_id: String,
        count: u32,
    },
    /// 实时收到新消息：追加/合并、刷新摘要；首次出现且 `count_unread` 时，
    /// 他人发来且不在当前会话的消息未读数 +1
    ReceiveMessage {
        message: Message,
        count_unread: bool,
    },
    Presence {
        user_id: String,
        online: bool,
        active_conversation: Option<String>,
    },
    Select {
        conversation_id: String,
    },
    SetLocalUser(Option<String>),
}

/// 命令执行后产生的变更，供监听器分发
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    MessagesChanged { conversation_id: String },
    ConversationChanged(Conversation),
    ConversationListChanged,
    UnreadChanged { total: u32 },
    PresenceChanged { user_id: String },
    Selected(SelectionEffects),
}

#[derive(Debug, Default)]
pub struct ChatState {
    local_user_id: Option<String>,
    messages: MessageStore,
    conversations: Vec<Conversation>,
    presence: PresenceState,
    controller: ActiveConversationController,
}

impl ChatState {
    pub fn new(local_user_id: Option<String>) -> Self {
        Self {
            local_user_id,
            ..Default::default()
        }
    }

    pub fn local_user_id(&self) -> Option<&str> {
        self.local_user_id.as_deref()
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    pub fn presence(&self) -> &PresenceState {
        &self.presence
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.controller.active()
    }

    /// 执行一条命令
    pub fn apply(&mut self, cmd: StoreCommand) -> Vec<StoreChange> {
        let mut changes = Vec::new();
        match cmd {
            StoreCommand::AppendOrReplace {
                conversation_id,
                message,
            } => {
                self.messages.append_or_replace(&conversation_id, message);
                changes.push(StoreChange::MessagesChanged { conversation_id });
            }
            StoreCommand::MarkRecalled {
                conversation_id,
                message_id,
                recalled_at,
            } => {
                if self
                    .messages
                    .mark_recalled(&conversation_id, &message_id, recalled_at)
                {
                    changes.push(StoreChange::MessagesChanged { conversation_id });
                }
            }
            StoreCommand::MarkRead {
                conversation_id,
                message_ids,
                reader_id,
            } => {
                if self
                    .messages
                    .mark_read(&conversation_id, &message_ids, &reader_id)
                    > 0
                {
                    changes.push(StoreChange::MessagesChanged { conversation_id });
                }
            }
            StoreCommand::LoadPage {
                conversation_id,
                messages,
                next_cursor,
                has_more,
                mode,
            } => {
                self.messages
                    .load_page(&conversation_id, messages, next_cursor, has_more, mode);
                changes.push(StoreChange::MessagesChanged { conversation_id });
            }
            StoreCommand::Remove {
                conversation_id,
                message_id,
            } => {
                if self.messages.remove(&conversation_id, &message_id) {
                    changes.push(StoreChange::MessagesChanged { conversation_id });
                }
            }
            StoreCommand::SetConversations(list) => {
                self.conversations = list;
                // 服务端列表里的未读数只作兜底，已有实时未读数优先
                for conv in &mut self.conversations {
                    match self.messages.unread_counts().get(&conv.id) {
                        Some(count) => conv.unread_count = *count,
                        None => self.messages.set_unread(&conv.id, conv.unread_count),
                    }
                }
                changes.push(StoreChange::ConversationListChanged);
                changes.push(StoreChange::UnreadChanged {
                    total: self.messages.total_unread(),
                });
            }
            StoreCommand::UpsertConversation(mut conv) => {
                conv.unread_count = self.messages.unread_count(&conv.id);
                match self.conversations.iter_mut().find(|c| c.id == conv.id) {
                    Some(existing) => *existing = conv.clone(),
                    None => self.conversations.insert(0, conv.clone()),
                }
                changes.push(StoreChange::ConversationChanged(conv));
            }
            StoreCommand::SetSummary {
                conversation_id,
                message,
            } => {
                if let Some(conv) = self.conversation_mut(&conversation_id) {
                    conv.last_message = Some(LastMessageSummary::from_message(&message));
                    changes.push(StoreChange::ConversationChanged(conv.clone()));
                }
            }
            StoreCommand::RefreshSummaryIfLast {
                conversation_id,
                message,
            } => {
                if let Some(conv) = self.conversation_mut(&conversation_id) {
                    if conv.last_message_is(&message.id) {
                        conv.last_message = Some(LastMessageSummary::from_message(&message));
                        changes.push(StoreChange::ConversationChanged(conv.clone()));
                    }
                }
            }
            StoreCommand::FlagSummaryRecalled {
                conversation_id,
                message_id,
            } => {
                if let Some(conv) = self.conversation_mut(&conversation_id) {
                    if let Some(summary) = conv
                        .last_message
                        .as_mut()
                        .filter(|s| s.id == message_id)
                    {
                        summary.recalled = true;
                        changes.push(StoreChange::ConversationChanged(conv.clone()));
                    }
                }
            }
            StoreCommand::ReplaceUnreadCounts(counts) => {
                for conv in &mut self.conversations {
                    conv.unread_count = counts.get(&conv.id).copied().unwrap_or(0);
                }
                self.messages.replace_unread_counts(counts);
                changes.push(StoreChange::ConversationListChanged);
                changes.push(StoreChange::UnreadChanged {
                    total: self.messages.total_unread(),
                });
            }
            StoreCommand::SetUnread {
                conversation_id,
                count,
            } => {
                self.set_unread(&conversation_id, count, &mut changes);
            }
            StoreCommand::ReceiveMessage {
                message,
                count_unread,
            } => {
                let conversation_id = message.conversation_id.clone();
                let own = self.local_user_id.as_deref() == Some(message.sender_id.as_str());
                let summary = LastMessageSummary::from_message(&message);
                let appended = self.messages.append_or_replace(&conversation_id, message);
                changes.push(StoreChange::MessagesChanged {
                    conversation_id: conversation_id.clone(),
                });
                if let Some(conv) = self.conversation_mut(&conversation_id) {
                    conv.last_message = Some(summary);
                    changes.push(StoreChange::ConversationChanged(conv.clone()));
                }
                if appended && count_unread && !own && !self.controller.is_active(&conversation_id)
                {
                    let count = self.messages.unread_count(&conversation_id) + 1;
                    self.set_unread(&conversation_id, count, &mut changes);
                }
            }
            StoreCommand::Presence {
                user_id,
                online,
                active_conversation,
            } => {
                self.presence
                    .apply(&user_id, online, active_conversation.as_deref());
                changes.push(StoreChange::PresenceChanged { user_id });
            }
            StoreCommand::Select { conversation_id } => {
                let needs_backfill = self.messages.is_empty(&conversation_id)
                    || !self.messages.has_loaded(&conversation_id);
                let effects = self.controller.select(&conversation_id, needs_backfill);
                // 打开会话即视为已读
                if self.messages.unread_count(&conversation_id) > 0 {
                    self.set_unread(&conversation_id, 0, &mut changes);
                }
                changes.push(StoreChange::Selected(effects));
            }
            StoreCommand::SetLocalUser(user) => {
                if user.is_none() {
                    self.controller.clear();
                }
                self.local_user_id = user;
            }
        }
        changes
    }

    fn conversation_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        let found = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id);
        if found.is_none() {
            debug!(
                "[Store] 会话不在列表中，跳过摘要更新: conversationID={}",
                conversation_id
            );
        }
        found
    }

    fn set_unread(&mut self, conversation_id: &str, count: u32, changes: &mut Vec<StoreChange>) {
        self.messages.set_unread(conversation_id, count);
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread_count = count;
            changes.push(StoreChange::ConversationChanged(conv.clone()));
        }
        changes.push(StoreChange::UnreadChanged {
            total: self.messages.total_unread(),
        });
    }
}

/// 共享状态句柄
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Arc<Mutex<ChatState>>,
}

impl StoreHandle {
    pub fn new(state: ChatState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn dispatch(&self, cmd: StoreCommand) -> Vec<StoreChange> {
        self.lock().apply(cmd)
    }

    /// 在同一次加锁内执行多条命令
    pub fn dispatch_all(&self, cmds: impl IntoIterator<Item = StoreCommand>) -> Vec<StoreChange> {
        let mut state = self.lock();
        cmds.into_iter().flat_map(|cmd| state.apply(cmd)).collect()
    }

    /// 退出登录时清空全部状态
    pub fn reset(&self) {
        *self.lock() = ChatState::default();
    }

    /// 只读访问
    pub fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        // 命令执行本身不会 panic；万一中毒也继续使用内部数据
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("[Store] 状态锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::message::models::fixtures::text;

    fn conv(id: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            name: id.to_uppercase(),
            avatar: None,
            is_group: true,
            participants: vec![],
            last_message: None,
            unread_count: 0,
        }
    }

    fn handle_with(convs: &[&str]) -> StoreHandle {
        let handle = StoreHandle::new(ChatState::new(Some("me".into())));
        handle.dispatch(StoreCommand::SetConversations(
            convs.iter().map(|c| conv(c)).collect(),
        ));
        handle
    }

    #[test]
    fn unread_snapshot_is_denormalized_onto_conversations() {
        let handle = handle_with(&["g1", "g2"]);
        let changes = handle.dispatch(StoreCommand::ReplaceUnreadCounts(HashMap::from([(
            "g2".to_string(),
            4,
        )])));
        assert!(changes.contains(&StoreChange::UnreadChanged { total: 4 }));
        handle.read(|s| {
            assert_eq!(s.conversation("g1").unwrap().unread_count, 0);
            assert_eq!(s.conversation("g2").unwrap().unread_count, 4);
        });
    }

    #[test]
    fn incoming_counts_only_for_others_outside_active_conversation() {
        let handle = handle_with(&["g1", "g2"]);
        handle.dispatch(StoreCommand::Select {
            conversation_id: "g1".into(),
        });
        let incoming = [
            ("g1", "m1", "u2"),
            ("g2", "m2", "me"),
            ("g2", "m3", "u2"),
            ("g2", "m4", "u3"),
            ("g2", "m4", "u3"),
        ];
        for (conv, id, sender) in incoming {
            handle.dispatch(StoreCommand::ReceiveMessage {
                message: text(conv, id, sender, "hi", 1),
                count_unread: true,
            });
        }
        handle.read(|s| {
            assert_eq!(s.messages().unread_count("g1"), 0);
            assert_eq!(s.conversation("g2").unwrap().unread_count, 2);
        });
    }

    #[test]
    fn summary_recall_flag_keeps_other_fields() {
        let handle = handle_with(&["g1"]);
        let msg = text("g1", "m1", "u2", "secret", 1);
        handle.dispatch_all([
            StoreCommand::AppendOrReplace {
                conversation_id: "g1".into(),
                message: msg.clone(),
            },
            StoreCommand::SetSummary {
                conversation_id: "g1".into(),
                message: msg,
            },
            StoreCommand::FlagSummaryRecalled {
                conversation_id: "g1".into(),
                message_id: "m1".into(),
            },
        ]);
        handle.read(|s| {
            let summary = s.conversation("g1").unwrap().last_message.clone().unwrap();
            assert!(summary.recalled);
            assert_eq!(summary.id, "m1");
            assert_eq!(summary.content.as_deref(), Some("secret"));
        });
    }

    #[test]
    fn refresh_summary_ignores_older_messages() {
        let handle = handle_with(&["g1"]);
        handle.dispatch(StoreCommand::SetSummary {
            conversation_id: "g1".into(),
            message: text("g1", "m2", "u2", "latest", 2),
        });
        let changes = handle.dispatch(StoreCommand::RefreshSummaryIfLast {
            conversation_id: "g1".into(),
            message: text("g1", "m1", "u2", "edited", 1),
        });
        assert!(changes.is_empty());
        handle.read(|s| {
            let summary = s.conversation("g1").unwrap().last_message.clone().unwrap();
            assert_eq!(summary.content.as_deref(), Some("latest"));
        });
    }

    #[test]
    fn select_clears_unread_and_reports_effects() {
        let handle = handle_with(&["g1"]);
        handle.dispatch(StoreCommand::SetUnread {
            conversation_id: "g1".into(),
            count: 3,
        });
        let changes = handle.dispatch(StoreCommand::Select {
            conversation_id: "g1".into(),
        });
        let effects = changes
            .iter()
            .find_map(|c| match c {
                StoreChange::Selected(fx) => Some(fx.clone()),
                _ => None,
            })
            .unwrap();
        assert!(effects.initial_load);
        assert!(changes.contains(&StoreChange::UnreadChanged { total: 0 }));
    }

    #[test]
    fn set_conversations_keeps_realtime_unread() {
        let handle = StoreHandle::new(ChatState::new(Some("me".into())));
        handle.dispatch(StoreCommand::ReplaceUnreadCounts(HashMap::from([(
            "g1".to_string(),
            2,
        )])));
        let mut listed = conv("g1");
        listed.unread_count = 9;
        let mut other = conv("g2");
        other.unread_count = 1;
        handle.dispatch(StoreCommand::SetConversations(vec![listed, other]));
        handle.read(|s| {
            assert_eq!(s.conversation("g1").unwrap().unread_count, 2);
            assert_eq!(s.messages().unread_count("g2"), 1);
        });
    }
}
