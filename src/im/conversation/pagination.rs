//! 历史消息分页加载
//!
//! 每个会话同一时间只允许一个请求在途，重复调用直接忽略。加载更早的消息前记录
//! 视口位置，视图在重新布局之后用 [`ScrollAnchor::restore`] 恢复可视位置。

use crate::im::message::api::MessageBackend;
use crate::im::message::store::PageMode;
use crate::im::state::{StoreChange, StoreCommand, StoreHandle};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 发起请求前的视口尺寸
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub scroll_height: f64,
    pub scroll_top: f64,
}

/// 滚动锚点：前插后保持用户看到的内容不跳动
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub old_scroll_height: f64,
    pub old_scroll_top: f64,
}

impl ScrollAnchor {
    /// 必须在列表按新数据完成布局之后调用
    pub fn restore(&self, new_scroll_height: f64) -> f64 {
        new_scroll_height - self.old_scroll_height + self.old_scroll_top
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOlderOutcome {
    /// 没有更多或已有请求在途，未发请求
    Skipped,
    Loaded { count: usize, anchor: ScrollAnchor },
    /// 数据已写入，但会话已不是当前会话，视图无需恢复滚动
    Stale { count: usize },
}

pub struct PaginationLoader {
    store: StoreHandle,
    backend: Arc<dyn MessageBackend>,
    page_size: u32,
    in_flight: Mutex<HashSet<String>>,
}

/// 在途标记，析构时释放
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    conversation_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.conversation_id);
        }
    }
}

impl PaginationLoader {
    pub fn new(store: StoreHandle, backend: Arc<dyn MessageBackend>, page_size: u32) -> Self {
        Self {
            store,
            backend,
            page_size,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_loading(&self, conversation_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(conversation_id))
            .unwrap_or(false)
    }

    fn try_begin(&self, conversation_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(conversation_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            conversation_id: conversation_id.to_string(),
        })
    }

    /// 以 INITIAL 模式拉取最新一页
    pub async fn load_initial(
        &self,
        conversation_id: &str,
    ) -> Result<Option<(usize, Vec<StoreChange>)>> {
        let Some(_guard) = self.try_begin(conversation_id) else {
            debug!(
                "[Pager] 首屏请求已在途，忽略: conversationID={}",
                conversation_id
            );
            return Ok(None);
        };

        info!("[Pager] 📡 拉取首屏消息: conversationID={}", conversation_id);
        let page = self
            .backend
            .fetch_page(conversation_id, None, self.page_size)
            .await
            .inspect_err(|e| {
                warn!(
                    "[Pager] 首屏拉取失败: conversationID={}, 错误: {}",
                    conversation_id, e
                )
            })?;

        let count = page.messages.len();
        let changes = self.store.dispatch(StoreCommand::LoadPage {
            conversation_id: conversation_id.to_string(),
            messages: page.messages,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            mode: PageMode::Initial,
        });
        info!(
            "[Pager] ✅ 首屏加载完成: conversationID={}, 条数: {}",
            conversation_id, count
        );
        Ok(Some((count, changes)))
    }

    /// 加载更早的一页
    pub async fn load_older(
        &self,
        conversation_id: &str,
        viewport: ViewportMetrics,
    ) -> Result<LoadOlderOutcome> {
        let Some(_guard) = self.try_begin(conversation_id) else {
            debug!(
                "[Pager] 分页请求已在途，忽略: conversationID={}",
                conversation_id
            );
            return Ok(LoadOlderOutcome::Skipped);
        };
        // 拿到在途标记之后再读游标
        let cursor = self.store.read(|s| s.messages().cursor(conversation_id));
        if !cursor.has_more {
            debug!("[Pager] 没有更多历史消息: conversationID={}", conversation_id);
            return Ok(LoadOlderOutcome::Skipped);
        }

        // 发请求前记录视口，失败时直接丢弃，不影响下一次
        let anchor = ScrollAnchor {
            old_scroll_height: viewport.scroll_height,
            old_scroll_top: viewport.scroll_top,
        };

        debug!(
            "[Pager] 📡 拉取历史消息: conversationID={}, cursor={:?}",
            conversation_id, cursor.cursor
        );
        let page = self
            .backend
            .fetch_page(conversation_id, cursor.cursor.as_deref(), self.page_size)
            .await
            .inspect_err(|e| {
                warn!(
                    "[Pager] 历史消息拉取失败: conversationID={}, 错误: {}",
                    conversation_id, e
                )
            })?;

        let count = page.messages.len();
        self.store.dispatch(StoreCommand::LoadPage {
            conversation_id: conversation_id.to_string(),
            messages: page.messages,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            mode: PageMode::Older,
        });

        let still_active = self
            .store
            .read(|s| s.active_conversation() == Some(conversation_id));
        info!(
            "[Pager] ✅ 历史消息加载完成: conversationID={}, 条数: {}, 仍为当前会话: {}",
            conversation_id, count, still_active
        );
        if still_active {
            Ok(LoadOlderOutcome::Loaded { count, anchor })
        } else {
            Ok(LoadOlderOutcome::Stale { count })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::message::api::MessagePage;
    use crate::im::message::models::fixtures::text;
    use crate::im::message::models::Message;
    use crate::im::message::send::OutgoingAttachment;
    use crate::im::state::ChatState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// 只实现分页的假后端；`gate` 用来把请求卡在途中
    struct PagedBackend {
        calls: AtomicUsize,
        gate: Option<Notify>,
        fail: bool,
    }

    impl PagedBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl MessageBackend for PagedBackend {
        async fn fetch_page(
            &self,
            conversation_id: &str,
            cursor: Option<&str>,
            _limit: u32,
        ) -> Result<MessagePage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                anyhow::bail!("connection reset");
            }
            let (messages, next_cursor, has_more) = match cursor {
                None => (
                    vec![text(conversation_id, "m100", "u1", "latest", 100)],
                    Some("c1".to_string()),
                    true,
                ),
                Some("c1") => (
                    (0..20)
                        .map(|i| text(conversation_id, &format!("m{}", i), "u1", "old", i))
                        .collect(),
                    Some("c2".to_string()),
                    false,
                ),
                Some(other) => panic!("unexpected cursor {}", other),
            };
            Ok(MessagePage {
                messages,
                next_cursor,
                has_more,
            })
        }

        async fn send_message(
            &self,
            _conversation_id: &str,
            _text: Option<&str>,
            _attachment: Option<&OutgoingAttachment>,
        ) -> Result<Message> {
            unreachable!()
        }
        async fn edit_message(&self, _message_id: &str, _content: &str) -> Result<Message> {
            unreachable!()
        }
        async fn recall_message(&self, _message_id: &str) -> Result<Message> {
            unreachable!()
        }
        async fn delete_message(&self, _message_id: &str) -> Result<()> {
            unreachable!()
        }
        async fn forward_message(
            &self,
            _message_id: &str,
            _target_conversation_ids: &[String],
        ) -> Result<Vec<Message>> {
            unreachable!()
        }
    }

    fn setup(backend: PagedBackend) -> (StoreHandle, Arc<PagedBackend>, Arc<PaginationLoader>) {
        let store = StoreHandle::new(ChatState::new(Some("me".into())));
        let backend = Arc::new(backend);
        let loader = Arc::new(PaginationLoader::new(store.clone(), backend.clone(), 20));
        (store, backend, loader)
    }

    const VIEWPORT: ViewportMetrics = ViewportMetrics {
        scroll_height: 1000.0,
        scroll_top: 0.0,
    };

    #[test]
    fn anchor_restores_visual_position() {
        let anchor = ScrollAnchor {
            old_scroll_height: 1000.0,
            old_scroll_top: 40.0,
        };
        assert_eq!(anchor.restore(1800.0), 840.0);
    }

    #[tokio::test]
    async fn older_page_then_exhausted() {
        let (store, backend, loader) = setup(PagedBackend::new());
        store.dispatch(StoreCommand::Select {
            conversation_id: "C".into(),
        });
        loader.load_initial("C").await.unwrap();
        let before = store.read(|s| s.messages().messages("C").len());

        let outcome = loader.load_older("C", VIEWPORT).await.unwrap();
        assert!(matches!(outcome, LoadOlderOutcome::Loaded { count: 20, .. }));
        store.read(|s| {
            assert_eq!(s.messages().messages("C").len(), before + 20);
            assert_eq!(s.messages().messages("C").last().unwrap().id, "m100");
            let cursor = s.messages().cursor("C");
            assert_eq!(cursor.cursor.as_deref(), Some("c2"));
            assert!(!cursor.has_more);
        });

        let calls = backend.calls.load(Ordering::SeqCst);
        assert_eq!(
            loader.load_older("C", VIEWPORT).await.unwrap(),
            LoadOlderOutcome::Skipped
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn concurrent_calls_issue_one_fetch() {
        let mut backend = PagedBackend::new();
        backend.gate = Some(Notify::new());
        let (store, backend, loader) = setup(backend);
        store.dispatch(StoreCommand::LoadPage {
            conversation_id: "C".into(),
            messages: vec![],
            next_cursor: Some("c1".into()),
            has_more: true,
            mode: PageMode::Initial,
        });

        let first = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_older("C", VIEWPORT).await })
        };
        while backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(loader.is_loading("C"));

        let second = loader.load_older("C", VIEWPORT).await.unwrap();
        assert_eq!(second, LoadOlderOutcome::Skipped);

        backend.gate.as_ref().unwrap().notify_one();
        let first = first.await.unwrap().unwrap();
        // 没有选中会话，结果按过期处理
        assert_eq!(first, LoadOlderOutcome::Stale { count: 20 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(!loader.is_loading("C"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_callers_never_reuse_a_consumed_cursor() {
        let (store, backend, loader) = setup(PagedBackend::new());
        store.dispatch(StoreCommand::LoadPage {
            conversation_id: "C".into(),
            messages: vec![],
            next_cursor: Some("c1".into()),
            has_more: true,
            mode: PageMode::Initial,
        });

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.load_older("C", VIEWPORT).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        store.read(|s| {
            assert_eq!(s.messages().messages("C").len(), 20);
            assert!(!s.messages().cursor("C").has_more);
        });
    }

    #[tokio::test]
    async fn failure_keeps_cursor_and_releases_guard() {
        let mut backend = PagedBackend::new();
        backend.fail = true;
        let (store, backend, loader) = setup(backend);
        store.dispatch(StoreCommand::LoadPage {
            conversation_id: "C".into(),
            messages: vec![],
            next_cursor: Some("c1".into()),
            has_more: true,
            mode: PageMode::Initial,
        });

        assert!(loader.load_older("C", VIEWPORT).await.is_err());
        assert!(loader.load_older("C", VIEWPORT).await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        store.read(|s| {
            let cursor = s.messages().cursor("C");
            assert_eq!(cursor.cursor.as_deref(), Some("c1"));
            assert!(cursor.has_more);
        });
    }

    #[tokio::test]
    async fn switching_away_marks_result_stale() {
        let mut backend = PagedBackend::new();
        backend.gate = Some(Notify::new());
        let (store, backend, loader) = setup(backend);
        store.dispatch(StoreCommand::LoadPage {
            conversation_id: "C".into(),
            messages: vec![],
            next_cursor: Some("c1".into()),
            has_more: true,
            mode: PageMode::Initial,
        });
        store.dispatch(StoreCommand::Select {
            conversation_id: "C".into(),
        });

        let pending = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_older("C", VIEWPORT).await })
        };
        while backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        store.dispatch(StoreCommand::Select {
            conversation_id: "D".into(),
        });
        backend.gate.as_ref().unwrap().notify_one();

        assert_eq!(
            pending.await.unwrap().unwrap(),
            LoadOlderOutcome::Stale { count: 20 }
        );
        store.read(|s| assert_eq!(s.messages().messages("C").len(), 20));
    }
}
