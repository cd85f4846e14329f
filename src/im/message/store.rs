//! 内存消息存储
//!
//! 按会话 ID 保存有序消息列表、分页游标和未读数。列表顺序即接收顺序，
//! 从不按时间戳重排。所有操作同步且不会失败，目标不存在时静默忽略。

use crate::im::message::models::Message;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// 分页加载模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// 首屏：整体替换（合并已通过实时通道收到的消息）
    Initial,
    /// 更早的一页：插到列表最前面
    Older,
}

/// 单个会话的分页游标
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// 服务端下发的不透明游标，None 表示没有更多
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    lists: HashMap<String, Vec<Message>>,
    cursors: HashMap<String, PageCursor>,
    unread: HashMap<String, u32>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同 ID 存在则原地合并，否则追加到末尾；返回是否为新追加
    pub fn append_or_replace(&mut self, conversation_id: &str, message: Message) -> bool {
        let list = self.lists.entry(conversation_id.to_string()).or_default();
        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            existing.merge_from(message);
            false
        } else {
            list.push(message);
            true
        }
    }

    /// 标记撤回；消息不存在时忽略
    pub fn mark_recalled(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        recalled_at: DateTime<Utc>,
    ) -> bool {
        match self.find_mut(conversation_id, message_id) {
            Some(msg) => {
                if !msg.recalled {
                    msg.recalled = true;
                    msg.recalled_at = Some(recalled_at);
                }
                true
            }
            None => {
                debug!(
                    "[Store] 撤回目标不存在，忽略: conversationID={}, messageID={}",
                    conversation_id, message_id
                );
                false
            }
        }
    }

    /// 为存在的消息加入已读用户，返回实际发生变化的条数
    pub fn mark_read(
        &mut self,
        conversation_id: &str,
        message_ids: &[String],
        reader_id: &str,
    ) -> usize {
        let Some(list) = self.lists.get_mut(conversation_id) else {
            return 0;
        };
        let wanted: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        list.iter_mut()
            .filter(|m| wanted.contains(m.id.as_str()))
            .map(|m| m.add_reader(reader_id))
            .filter(|changed| *changed)
            .count()
    }

    /// 写入一页消息并更新游标
    ///
    /// `messages` 须已按时间正序排列（旧的在前）。
    pub fn load_page(
        &mut self,
        conversation_id: &str,
        messages: Vec<Message>,
        next_cursor: Option<String>,
        has_more: bool,
        mode: PageMode,
    ) {
        let list = self.lists.entry(conversation_id.to_string()).or_default();
        match mode {
            PageMode::Initial => {
                let page_ids: HashSet<String> = messages.iter().map(|m| m.id.clone()).collect();
                let early: Vec<Message> = std::mem::take(list)
                    .into_iter()
                    .filter(|m| !page_ids.contains(&m.id))
                    .collect();
                if !early.is_empty() {
                    debug!(
                        "[Store] 首屏合并保留 {} 条先到的实时消息: conversationID={}",
                        early.len(),
                        conversation_id
                    );
                }
                *list = messages;
                list.extend(early);
            }
            PageMode::Older => {
                let mut fresh = Vec::with_capacity(messages.len() + list.len());
                for msg in messages {
                    if let Some(existing) = list.iter_mut().find(|m| m.id == msg.id) {
                        existing.merge_from(msg);
                    } else {
                        fresh.push(msg);
                    }
                }
                fresh.append(list);
                *list = fresh;
            }
        }
        self.cursors.insert(
            conversation_id.to_string(),
            PageCursor {
                cursor: next_cursor,
                has_more,
            },
        );
    }

    /// 删除消息，返回是否存在
    pub fn remove(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let Some(list) = self.lists.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != message_id);
        before != list.len()
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.lists
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.messages(conversation_id)
            .iter()
            .find(|m| m.id == message_id)
    }

    pub fn last(&self, conversation_id: &str) -> Option<&Message> {
        self.messages(conversation_id).last()
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.messages(conversation_id).is_empty()
    }

    /// 未加载过的会话视为“还有更多”，游标为空
    pub fn cursor(&self, conversation_id: &str) -> PageCursor {
        self.cursors
            .get(conversation_id)
            .cloned()
            .unwrap_or(PageCursor {
                cursor: None,
                has_more: true,
            })
    }

    pub fn has_loaded(&self, conversation_id: &str) -> bool {
        self.cursors.contains_key(conversation_id)
    }

    pub fn unread_count(&self, conversation_id: &str) -> u32 {
        self.unread.get(conversation_id).copied().unwrap_or(0)
    }

    pub fn unread_counts(&self) -> &HashMap<String, u32> {
        &self.unread
    }

    /// 整体替换未读数
    pub fn replace_unread_counts(&mut self, counts: HashMap<String, u32>) {
        self.unread = counts;
    }

    pub fn set_unread(&mut self, conversation_id: &str, count: u32) {
        self.unread.insert(conversation_id.to_string(), count);
    }

    pub fn increment_unread(&mut self, conversation_id: &str) -> u32 {
        let count = self.unread.entry(conversation_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    fn find_mut(&mut self, conversation_id: &str, message_id: &str) -> Option<&mut Message> {
        self.lists
            .get_mut(conversation_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }
}
