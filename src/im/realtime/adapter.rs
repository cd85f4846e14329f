//! 实时事件适配器：把入站事件翻译为状态命令
//!
//! 事件按到达顺序应用，依赖按 ID 合并、集合添加等幂等操作容忍重复投递。

use crate::im::listener::{forward_changes, ChatListener};
use crate::im::message::models::Message;
use crate::im::realtime::events::{InboundEvent, MessageNotice};
use crate::im::state::{StoreChange, StoreCommand, StoreHandle};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RealtimeEventAdapter {
    store: StoreHandle,
    listener: Arc<dyn ChatListener>,
}

impl RealtimeEventAdapter {
    pub fn new(store: StoreHandle, listener: Arc<dyn ChatListener>) -> Self {
        Self { store, listener }
    }

    /// 应用事件并通知监听器
    pub async fn handle(&self, event: InboundEvent) -> Vec<StoreChange> {
        let changes = self.apply(event.clone());
        match event {
            InboundEvent::NotifyMessage(MessageNotice { message, .. })
            | InboundEvent::NewMessage(message) => self.listener.on_recv_new_message(message).await,
            InboundEvent::NotifyMessageUpdate(message) | InboundEvent::MessageEdited(message) => {
                self.listener.on_message_edited(message).await
            }
            InboundEvent::MessageRecalled(notice) => {
                self.listener
                    .on_message_recalled(notice.conversation_id, notice.message_id)
                    .await
            }
            _ => {}
        }
        forward_changes(&self.listener, changes.clone()).await;
        changes
    }

    /// 只做状态变更，不触发回调
    pub fn apply(&self, event: InboundEvent) -> Vec<StoreChange> {
        debug!("[Adapter] 应用事件: {}", event.name());
        let commands = match event {
            InboundEvent::InitialUnreadCounts(counts) => {
                info!("[Adapter] 📬 收到未读数快照，会话数: {}", counts.len());
                vec![StoreCommand::ReplaceUnreadCounts(counts)]
            }
            InboundEvent::NotifyMessage(notice) => {
                Self::new_message_commands(notice.message, notice.unread_counts)
            }
            InboundEvent::NewMessage(message) => Self::new_message_commands(message, None),
            InboundEvent::NotifyMessageUpdate(message) | InboundEvent::MessageEdited(message) => {
                let conversation_id = message.conversation_id.clone();
                vec![
                    StoreCommand::AppendOrReplace {
                        conversation_id: conversation_id.clone(),
                        message: message.clone(),
                    },
                    StoreCommand::RefreshSummaryIfLast {
                        conversation_id,
                        message,
                    },
                ]
            }
            InboundEvent::MessageRecalled(notice) => {
                let recalled_at = notice.recalled_at.unwrap_or_else(Utc::now);
                let mut cmds = vec![StoreCommand::MarkRecalled {
                    conversation_id: notice.conversation_id.clone(),
                    message_id: notice.message_id.clone(),
                    recalled_at,
                }];
                // 撤回视为当前用户已读
                if let Some(me) = self.store.read(|s| s.local_user_id().map(str::to_string)) {
                    cmds.push(StoreCommand::MarkRead {
                        conversation_id: notice.conversation_id.clone(),
                        message_ids: vec![notice.message_id.clone()],
                        reader_id: me,
                    });
                }
                cmds.push(StoreCommand::FlagSummaryRecalled {
                    conversation_id: notice.conversation_id,
                    message_id: notice.message_id,
                });
                cmds
            }
            InboundEvent::UnreadCountUpdated(notice) => vec![StoreCommand::SetUnread {
                conversation_id: notice.conversation_id,
                count: notice.unread_count,
            }],
            InboundEvent::MessagesRead(notice) => vec![StoreCommand::MarkRead {
                conversation_id: notice.conversation_id,
                message_ids: notice.message_ids,
                reader_id: notice.reader_id,
            }],
            InboundEvent::UserStatusUpdate(notice) => vec![StoreCommand::Presence {
                user_id: notice.user_id,
                online: notice.online,
                active_conversation: notice.active_conversation_id,
            }],
            // 回执在传输层匹配
            InboundEvent::Ack(_) => Vec::new(),
        };
        self.store.dispatch_all(commands)
    }

    /// 服务端带了未读数就以服务端为准，否则本地计数
    fn new_message_commands(
        message: Message,
        unread_counts: Option<HashMap<String, u32>>,
    ) -> Vec<StoreCommand> {
        let mut cmds = vec![StoreCommand::ReceiveMessage {
            message,
            count_unread: unread_counts.is_none(),
        }];
        if let Some(counts) = unread_counts {
            cmds.extend(
                counts
                    .into_iter()
                    .map(|(conversation_id, count)| StoreCommand::SetUnread {
                        conversation_id,
                        count,
                    }),
            );
        }
        cmds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::models::Conversation;
    use crate::im::listener::recording::RecordingListener;
    use crate::im::message::models::fixtures::text;
    use crate::im::presence::OnlineStatus;
    use crate::im::realtime::events::{ReadNotice, RecallNotice, StatusNotice, UnreadCountNotice};
    use crate::im::state::ChatState;

    fn setup() -> (StoreHandle, RealtimeEventAdapter, Arc<RecordingListener>) {
        let store = StoreHandle::new(ChatState::new(Some("me".into())));
        store.dispatch(StoreCommand::SetConversations(vec![Conversation {
            id: "g1".into(),
            name: "Team".into(),
            avatar: None,
            is_group: true,
            participants: vec![],
            last_message: None,
            unread_count: 0,
        }]));
        let listener = Arc::new(RecordingListener::default());
        let adapter = RealtimeEventAdapter::new(store.clone(), listener.clone());
        (store, adapter, listener)
    }

    #[test]
    fn new_message_updates_list_summary_and_unread() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::NewMessage(text("g1", "m1", "u2", "hey", 1)));
        adapter.apply(InboundEvent::NewMessage(text("g1", "m1", "u2", "hey", 1)));

        store.read(|s| {
            assert_eq!(s.messages().messages("g1").len(), 1);
            let conv = s.conversation("g1").unwrap();
            assert_eq!(conv.last_message.as_ref().unwrap().preview_text(), "hey");
            // 重复投递不重复计数
            assert_eq!(conv.unread_count, 1);
        });
    }

    #[test]
    fn wrapped_notice_uses_server_counts() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::NotifyMessage(MessageNotice {
            message: text("g1", "m1", "u2", "hey", 1),
            unread_counts: Some(HashMap::from([("g1".to_string(), 7)])),
        }));
        store.read(|s| assert_eq!(s.conversation("g1").unwrap().unread_count, 7));
    }

    #[test]
    fn edit_of_last_message_refreshes_summary() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::NewMessage(text("g1", "m1", "u2", "helo", 1)));
        let mut edited = text("g1", "m1", "u2", "hello", 1);
        edited.original_content = Some("helo".into());
        adapter.apply(InboundEvent::MessageEdited(edited));

        store.read(|s| {
            assert_eq!(s.messages().messages("g1").len(), 1);
            let msg = s.messages().get("g1", "m1").unwrap();
            assert_eq!(msg.content.as_deref(), Some("hello"));
            assert_eq!(msg.original_content.as_deref(), Some("helo"));
            let summary = s.conversation("g1").unwrap().last_message.clone().unwrap();
            assert_eq!(summary.content.as_deref(), Some("hello"));
        });
    }

    #[test]
    fn recall_of_last_message_flags_summary_and_marks_read() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::NewMessage(text("g1", "m1", "u2", "oops", 1)));
        adapter.apply(InboundEvent::MessageRecalled(RecallNotice {
            conversation_id: "g1".into(),
            message_id: "m1".into(),
            recalled_at: None,
        }));

        store.read(|s| {
            let msg = s.messages().get("g1", "m1").unwrap();
            assert!(msg.recalled);
            assert!(msg.recalled_at.is_some());
            assert!(msg.is_read_by("me"));

            let summary = s.conversation("g1").unwrap().last_message.clone().unwrap();
            assert!(summary.recalled);
            assert_eq!(summary.id, "m1");
            assert_eq!(summary.content.as_deref(), Some("oops"));
        });
    }

    #[test]
    fn recall_of_unknown_message_is_silent() {
        let (store, adapter, _) = setup();
        let changes = adapter.apply(InboundEvent::MessageRecalled(RecallNotice {
            conversation_id: "g1".into(),
            message_id: "ghost".into(),
            recalled_at: None,
        }));
        assert!(changes.is_empty());
        store.read(|s| assert!(s.messages().is_empty("g1")));
    }

    #[test]
    fn read_receipts_and_presence_are_idempotent() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::NewMessage(text("g1", "m1", "me", "x", 1)));
        let read = InboundEvent::MessagesRead(ReadNotice {
            conversation_id: "g1".into(),
            message_ids: vec!["m1".into()],
            reader_id: "u2".into(),
        });
        adapter.apply(read.clone());
        adapter.apply(read);

        let status = InboundEvent::UserStatusUpdate(StatusNotice {
            user_id: "u2".into(),
            online: true,
            active_conversation_id: Some("g1".into()),
        });
        adapter.apply(status.clone());
        adapter.apply(status);

        store.read(|s| {
            assert_eq!(s.messages().get("g1", "m1").unwrap().read_by, vec!["u2"]);
            assert_eq!(s.presence().status_of("u2", "g1"), OnlineStatus::Active);
        });
    }

    #[test]
    fn unread_snapshot_and_single_update() {
        let (store, adapter, _) = setup();
        adapter.apply(InboundEvent::InitialUnreadCounts(HashMap::from([
            ("g1".to_string(), 2),
            ("g9".to_string(), 1),
        ])));
        adapter.apply(InboundEvent::UnreadCountUpdated(UnreadCountNotice {
            conversation_id: "g1".into(),
            unread_count: 5,
        }));
        store.read(|s| {
            assert_eq!(s.conversation("g1").unwrap().unread_count, 5);
            assert_eq!(s.messages().total_unread(), 6);
        });
    }

    #[tokio::test]
    async fn handle_notifies_listener() {
        let (_, adapter, listener) = setup();
        adapter
            .handle(InboundEvent::NewMessage(text("g1", "m1", "u2", "hey", 1)))
            .await;
        let calls = listener.calls();
        assert_eq!(calls[0], "new:m1");
        assert!(calls.contains(&"messages:g1".to_string()));
        assert!(calls.contains(&"unread:1".to_string()));
    }
}
