//! 聊天监听器回调接口
//!
//! UI 层实现该接口以接收状态变化；所有回调都在事件处理任务中按顺序调用。

use crate::im::conversation::controller::SelectionEffects;
use crate::im::conversation::models::Conversation;
use crate::im::message::models::Message;
use crate::im::push::NotificationPayload;
use crate::im::state::StoreChange;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ChatListener: Send + Sync {
    /// 实时连接状态变化
    async fn on_connection_status_changed(&self, connected: bool, message: String);

    /// 收到新消息（实时推送）
    async fn on_recv_new_message(&self, message: Message);

    /// 消息被编辑
    async fn on_message_edited(&self, message: Message);

    /// 消息被撤回
    async fn on_message_recalled(&self, conversation_id: String, message_id: String);

    /// 某会话的消息列表有变化（分页、已读、删除等）
    async fn on_messages_changed(&self, conversation_id: String);

    /// 单个会话变更（摘要、未读数）
    async fn on_conversation_changed(&self, conversation: Conversation);

    /// 会话列表整体刷新
    async fn on_conversation_list_changed(&self);

    /// 总未读数变更
    async fn on_total_unread_count_changed(&self, total: u32);

    /// 用户在线状态变更
    async fn on_presence_changed(&self, user_id: String);

    /// 选中会话后视图需要执行的动作（滚动到底部等）
    async fn on_conversation_selected(&self, effects: SelectionEffects);

    /// 需要以横幅形式提示的错误
    async fn on_error_notice(&self, notice: String);

    /// 收到推送通知（已归一化）
    async fn on_push_notification(&self, payload: NotificationPayload);
}

/// 空实现（默认监听器）
pub struct EmptyChatListener;

#[async_trait]
impl ChatListener for EmptyChatListener {
    async fn on_connection_status_changed(&self, _connected: bool, _message: String) {}
    async fn on_recv_new_message(&self, _message: Message) {}
    async fn on_message_edited(&self, _message: Message) {}
    async fn on_message_recalled(&self, _conversation_id: String, _message_id: String) {}
    async fn on_messages_changed(&self, _conversation_id: String) {}
    async fn on_conversation_changed(&self, _conversation: Conversation) {}
    async fn on_conversation_list_changed(&self) {}
    async fn on_total_unread_count_changed(&self, _total: u32) {}
    async fn on_presence_changed(&self, _user_id: String) {}
    async fn on_conversation_selected(&self, _effects: SelectionEffects) {}
    async fn on_error_notice(&self, _notice: String) {}
    async fn on_push_notification(&self, _payload: NotificationPayload) {}
}

/// 把状态变更转发给监听器
pub async fn forward_changes(listener: &Arc<dyn ChatListener>, changes: Vec<StoreChange>) {
    for change in changes {
        match change {
            StoreChange::MessagesChanged { conversation_id } => {
                listener.on_messages_changed(conversation_id).await
            }
            StoreChange::ConversationChanged(conv) => listener.on_conversation_changed(conv).await,
            StoreChange::ConversationListChanged => listener.on_conversation_list_changed().await,
            StoreChange::UnreadChanged { total } => {
                listener.on_total_unread_count_changed(total).await
            }
            StoreChange::PresenceChanged { user_id } => listener.on_presence_changed(user_id).await,
            StoreChange::Selected(effects) => listener.on_conversation_selected(effects).await,
        }
    }
}
