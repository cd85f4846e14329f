//! 消息发送管线
//!
//! 不做乐观回显：只有服务器确认后消息才进入本地列表。成功后依次通知实时通道、
//! 写入消息列表、刷新会话摘要。

use crate::im::error::ClientError;
use crate::im::listener::{forward_changes, ChatListener};
use crate::im::message::api::MessageBackend;
use crate::im::message::models::{Message, MessageKind};
use crate::im::realtime::events::OutboundEvent;
use crate::im::realtime::transport::RealtimeSink;
use crate::im::state::{StoreCommand, StoreHandle};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 待上传的附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl OutgoingAttachment {
    /// 按文件名推断 MIME
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            bytes,
            mime,
        }
    }

    pub fn with_mime(file_name: impl Into<String>, bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            mime: mime.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_mime(&self.mime)
    }
}

pub struct SendPipeline {
    store: StoreHandle,
    backend: Arc<dyn MessageBackend>,
    sink: Arc<dyn RealtimeSink>,
    listener: Arc<dyn ChatListener>,
}

impl SendPipeline {
    pub fn new(
        store: StoreHandle,
        backend: Arc<dyn MessageBackend>,
        sink: Arc<dyn RealtimeSink>,
        listener: Arc<dyn ChatListener>,
    ) -> Self {
        Self {
            store,
            backend,
            sink,
            listener,
        }
    }

    /// 发送消息
    ///
    /// 正文和附件都为空，或缺少会话/本地用户时直接返回 `Ok(None)`，不发请求。
    pub async fn send(
        &self,
        conversation_id: &str,
        text: Option<&str>,
        attachment: Option<OutgoingAttachment>,
    ) -> Result<Option<Message>> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && attachment.is_none() {
            debug!("[Send] 正文和附件均为空，忽略");
            return Ok(None);
        }
        if conversation_id.is_empty() {
            debug!("[Send] 未选择会话，忽略");
            return Ok(None);
        }
        if self.store.read(|s| s.local_user_id().is_none()) {
            debug!("[Send] 未登录，忽略");
            return Ok(None);
        }

        let message = self
            .backend
            .send_message(conversation_id, text, attachment.as_ref())
            .await
            .inspect_err(|e| {
                error!(
                    "[Send] ❌ 发送失败: conversationID={}, 错误: {}",
                    conversation_id, e
                )
            })?;
        info!(
            "[Send] ✅ 服务器已确认: conversationID={}, messageID={}",
            conversation_id, message.id
        );

        // 通知失败不影响本地结果，服务端已持久化
        if let Err(e) = self
            .sink
            .emit(OutboundEvent::Send {
                conversation_id: conversation_id.to_string(),
                message_id: message.id.clone(),
            })
            .await
        {
            warn!("[Send] ⚠️ 实时通道通知失败: {}", e);
        }

        let changes = self.store.dispatch_all([
            StoreCommand::AppendOrReplace {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            },
            StoreCommand::SetSummary {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            },
        ]);
        forward_changes(&self.listener, changes).await;
        Ok(Some(message))
    }

    /// 编辑自己的消息
    pub async fn edit(&self, conversation_id: &str, message_id: &str, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("消息内容不能为空".to_string()).into());
        }
        let message = self.backend.edit_message(message_id, content).await?;
        let changes = self.store.dispatch_all([
            StoreCommand::AppendOrReplace {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            },
            StoreCommand::RefreshSummaryIfLast {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
            },
        ]);
        forward_changes(&self.listener, changes).await;
        self.listener.on_message_edited(message.clone()).await;
        Ok(message)
    }

    pub async fn recall(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let mut message = self.backend.recall_message(message_id).await?;
        message.recalled = true;
        let recalled_at = message.recalled_at.unwrap_or_else(chrono::Utc::now);
        message.recalled_at = Some(recalled_at);

        let changes = self.store.dispatch_all([
            StoreCommand::AppendOrReplace {
                conversation_id: conversation_id.to_string(),
                message,
            },
            StoreCommand::FlagSummaryRecalled {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            },
        ]);
        forward_changes(&self.listener, changes).await;
        self.listener
            .on_message_recalled(conversation_id.to_string(), message_id.to_string())
            .await;
        Ok(())
    }

    pub async fn delete(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.backend.delete_message(message_id).await?;
        let changes = self.store.dispatch(StoreCommand::Remove {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
        forward_changes(&self.listener, changes).await;
        Ok(())
    }

    /// 转发到多个会话，新消息写入各自的会话
    pub async fn forward(&self, message_id: &str, targets: &[String]) -> Result<Vec<Message>> {
        if targets.is_empty() {
            return Err(ClientError::Validation("请选择转发目标".to_string()).into());
        }
        let copies = self.backend.forward_message(message_id, targets).await?;
        let commands = copies.iter().flat_map(|m| {
            [
                StoreCommand::AppendOrReplace {
                    conversation_id: m.conversation_id.clone(),
                    message: m.clone(),
                },
                StoreCommand::SetSummary {
                    conversation_id: m.conversation_id.clone(),
                    message: m.clone(),
                },
            ]
        });
        let changes = self.store.dispatch_all(commands.collect::<Vec<_>>());
        forward_changes(&self.listener, changes).await;
        Ok(copies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::models::Conversation;
    use crate::im::listener::recording::RecordingListener;
    use crate::im::message::api::MessagePage;
    use crate::im::message::models::fixtures::text;
    use crate::im::realtime::transport::recording::RecordingSink;
    use crate::im::state::ChatState;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        sent: Mutex<Vec<(String, Option<String>, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageBackend for FakeBackend {
        async fn fetch_page(&self, _c: &str, _cursor: Option<&str>, _l: u32) -> Result<MessagePage> {
            Ok(MessagePage::default())
        }

        async fn send_message(
            &self,
            conversation_id: &str,
            body: Option<&str>,
            attachment: Option<&OutgoingAttachment>,
        ) -> Result<Message> {
            if self.fail {
                anyhow::bail!("boom");
            }
            self.sent.lock().unwrap().push((
                conversation_id.to_string(),
                body.map(str::to_string),
                attachment.map(|a| a.mime.clone()),
            ));
            let mut msg = text(conversation_id, "m1", "me", body.unwrap_or(""), 1);
            if let Some(file) = attachment {
                msg.kind = file.kind();
                msg.content = None;
            }
            Ok(msg)
        }

        async fn edit_message(&self, message_id: &str, content: &str) -> Result<Message> {
            let mut msg = text("C", message_id, "me", content, 1);
            msg.original_content = Some("hello".into());
            Ok(msg)
        }

        async fn recall_message(&self, message_id: &str) -> Result<Message> {
            Ok(text("C", message_id, "me", "hello", 1))
        }

        async fn delete_message(&self, _message_id: &str) -> Result<()> {
            Ok(())
        }

        async fn forward_message(&self, message_id: &str, targets: &[String]) -> Result<Vec<Message>> {
            Ok(targets
                .iter()
                .map(|t| text(t, &format!("{}-{}", message_id, t), "me", "fwd", 2))
                .collect())
        }
    }

    struct Fixture {
        store: StoreHandle,
        backend: Arc<FakeBackend>,
        sink: Arc<RecordingSink>,
        pipeline: SendPipeline,
    }

    fn fixture(local_user: Option<&str>, backend: FakeBackend) -> Fixture {
        let store = StoreHandle::new(ChatState::new(local_user.map(str::to_string)));
        store.dispatch(StoreCommand::SetConversations(vec![Conversation {
            id: "C".into(),
            name: "Team".into(),
            avatar: None,
            is_group: true,
            participants: vec![],
            last_message: None,
            unread_count: 0,
        }]));
        let backend = Arc::new(backend);
        let sink = Arc::new(RecordingSink::default());
        let pipeline = SendPipeline::new(
            store.clone(),
            backend.clone(),
            sink.clone(),
            Arc::new(RecordingListener::default()),
        );
        Fixture {
            store,
            backend,
            sink,
            pipeline,
        }
    }

    #[tokio::test]
    async fn text_message_is_sent_stored_and_announced() {
        let f = fixture(Some("me"), FakeBackend::default());
        let sent = f.pipeline.send("C", Some("hello"), None).await.unwrap();
        assert_eq!(sent.unwrap().id, "m1");

        assert_eq!(
            f.sink.emitted().as_slice(),
            &[OutboundEvent::Send {
                conversation_id: "C".into(),
                message_id: "m1".into()
            }]
        );
        f.store.read(|s| {
            let last = s.messages().last("C").unwrap();
            assert_eq!(last.id, "m1");
            assert_eq!(last.content.as_deref(), Some("hello"));
            assert_eq!(last.sender_id, "me");
            assert_eq!(last.kind, MessageKind::Text);
            assert_eq!(s.messages().messages("C").len(), 1);
            let summary = s.conversation("C").unwrap().last_message.clone().unwrap();
            assert_eq!(summary.preview_text(), "hello");
        });
    }

    #[tokio::test]
    async fn text_keeps_surrounding_whitespace() {
        let f = fixture(Some("me"), FakeBackend::default());
        f.pipeline
            .send("C", Some("  indented\n"), None)
            .await
            .unwrap();
        assert_eq!(
            f.backend.sent.lock().unwrap()[0].1.as_deref(),
            Some("  indented\n")
        );
    }

    #[tokio::test]
    async fn empty_input_or_missing_identity_is_silent() {
        let f = fixture(Some("me"), FakeBackend::default());
        assert!(f.pipeline.send("C", Some("   "), None).await.unwrap().is_none());
        assert!(f.pipeline.send("", Some("hi"), None).await.unwrap().is_none());

        let anon = fixture(None, FakeBackend::default());
        assert!(anon.pipeline.send("C", Some("hi"), None).await.unwrap().is_none());

        assert!(f.backend.sent.lock().unwrap().is_empty());
        assert!(anon.backend.sent.lock().unwrap().is_empty());
        assert!(f.sink.emitted().is_empty());
    }

    #[tokio::test]
    async fn attachment_kind_follows_mime() {
        let f = fixture(Some("me"), FakeBackend::default());
        let file = OutgoingAttachment::new("clip.mp4", vec![0; 4]);
        assert_eq!(file.kind(), MessageKind::Video);
        f.pipeline.send("C", None, Some(file)).await.unwrap();

        assert_eq!(
            f.backend.sent.lock().unwrap()[0].2.as_deref(),
            Some("video/mp4")
        );
        f.store.read(|s| {
            let summary = s.conversation("C").unwrap().last_message.clone().unwrap();
            assert_eq!(summary.preview_text(), "[Video]");
        });
        assert_eq!(
            OutgoingAttachment::new("notes.bin", vec![]).kind(),
            MessageKind::Raw
        );
    }

    #[tokio::test]
    async fn failure_leaves_store_untouched() {
        let f = fixture(
            Some("me"),
            FakeBackend {
                fail: true,
                ..Default::default()
            },
        );
        assert!(f.pipeline.send("C", Some("hello"), None).await.is_err());
        f.store.read(|s| assert!(s.messages().is_empty("C")));
        assert!(f.sink.emitted().is_empty());
    }

    #[tokio::test]
    async fn edit_recall_delete_fold_into_store() {
        let f = fixture(Some("me"), FakeBackend::default());
        f.pipeline.send("C", Some("hello"), None).await.unwrap();

        f.pipeline.edit("C", "m1", "hello!").await.unwrap();
        f.store.read(|s| {
            let msg = s.messages().get("C", "m1").unwrap();
            assert_eq!(msg.content.as_deref(), Some("hello!"));
            assert_eq!(msg.original_content.as_deref(), Some("hello"));
        });
        assert!(f.pipeline.edit("C", "m1", "  ").await.is_err());

        f.pipeline.recall("C", "m1").await.unwrap();
        f.store.read(|s| {
            assert!(s.messages().get("C", "m1").unwrap().recalled);
            let summary = s.conversation("C").unwrap().last_message.clone().unwrap();
            assert_eq!(summary.preview_text(), "[Recalled]");
        });

        f.pipeline.delete("C", "m1").await.unwrap();
        f.store.read(|s| assert!(s.messages().is_empty("C")));
    }

    #[tokio::test]
    async fn forward_writes_into_target_conversations() {
        let f = fixture(Some("me"), FakeBackend::default());
        let copies = f
            .pipeline
            .forward("m1", &["C".to_string(), "D".to_string()])
            .await
            .unwrap();
        assert_eq!(copies.len(), 2);
        f.store.read(|s| {
            assert_eq!(s.messages().last("D").unwrap().id, "m1-D");
            assert_eq!(
                s.conversation("C").unwrap().last_message.as_ref().unwrap().id,
                "m1-C"
            );
        });
        assert!(f.pipeline.forward("m1", &[]).await.is_err());
    }
}
