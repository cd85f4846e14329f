//! 消息 HTTP API 客户端
//!
//! 负责消息的拉取、发送、编辑、撤回、删除和转发

use crate::im::message::models::Message;
use crate::im::message::send::OutgoingAttachment;
use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, info};

/// 一页历史消息（按时间正序）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// 消息后端接口，分页加载器和发送管线都依赖它
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// 拉取一页消息，`cursor` 为 None 时取最新一页
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage>;

    /// 发送消息；有附件时走 multipart
    async fn send_message(
        &self,
        conversation_id: &str,
        text: Option<&str>,
        attachment: Option<&OutgoingAttachment>,
    ) -> Result<Message>;

    async fn edit_message(&self, message_id: &str, content: &str) -> Result<Message>;

    async fn recall_message(&self, message_id: &str) -> Result<Message>;

    async fn delete_message(&self, message_id: &str) -> Result<()>;

    /// 转发到多个会话，返回每个目标会话里新建的消息
    async fn forward_message(
        &self,
        message_id: &str,
        target_conversation_ids: &[String],
    ) -> Result<Vec<Message>>;
}

/// 消息相关的 HTTP API 客户端
pub struct MessageApi {
    session: HttpSession,
}

impl MessageApi {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl MessageBackend for MessageApi {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage> {
        let path = format!("/groups/{}/messages", conversation_id);
        debug!(
            "[MsgAPI] 📡 拉取消息: conversationID={}, cursor={:?}, limit={}",
            conversation_id, cursor, limit
        );

        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .session
            .request(Method::GET, &path)
            .query(&query)
            .send()
            .await
            .context("拉取消息请求失败")?;

        let page = handle_http_response::<MessagePage>(response, "拉取消息")
            .await?
            .into_data("拉取消息")?;
        debug!(
            "[MsgAPI] 收到 {} 条消息, hasMore={}",
            page.messages.len(),
            page.has_more
        );
        Ok(page)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: Option<&str>,
        attachment: Option<&OutgoingAttachment>,
    ) -> Result<Message> {
        let path = format!("/groups/{}/messages", conversation_id);
        let request = self.session.request(Method::POST, &path);

        let request = match attachment {
            Some(file) => {
                info!(
                    "[MsgAPI] 📤 发送附件消息: conversationID={}, 文件: {} ({}, {} 字节)",
                    conversation_id,
                    file.file_name,
                    file.mime,
                    file.bytes.len()
                );
                let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)
                    .context("附件 MIME 类型无效")?;
                let mut form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("kind", kind_wire_name(file));
                if let Some(text) = text {
                    form = form.text("content", text.to_string());
                }
                request.multipart(form)
            }
            None => {
                info!("[MsgAPI] 📤 发送文本消息: conversationID={}", conversation_id);
                request.json(&serde_json::json!({ "content": text }))
            }
        };

        let response = request.send().await.context("发送消息请求失败")?;
        handle_http_response::<Message>(response, "发送消息")
            .await?
            .into_data("发送消息")
    }

    async fn edit_message(&self, message_id: &str, content: &str) -> Result<Message> {
        info!("[MsgAPI] ✏️ 编辑消息: messageID={}", message_id);
        let response = self
            .session
            .request(Method::PATCH, &format!("/messages/{}", message_id))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .context("编辑消息请求失败")?;
        handle_http_response::<Message>(response, "编辑消息")
            .await?
            .into_data("编辑消息")
    }

    async fn recall_message(&self, message_id: &str) -> Result<Message> {
        info!("[MsgAPI] ↩️ 撤回消息: messageID={}", message_id);
        let response = self
            .session
            .request(Method::POST, &format!("/messages/{}/recall", message_id))
            .send()
            .await
            .context("撤回消息请求失败")?;
        handle_http_response::<Message>(response, "撤回消息")
            .await?
            .into_data("撤回消息")
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        info!("[MsgAPI] 🗑️ 删除消息: messageID={}", message_id);
        let response = self
            .session
            .request(Method::DELETE, &format!("/messages/{}", message_id))
            .send()
            .await
            .context("删除消息请求失败")?;
        handle_http_response::<serde_json::Value>(response, "删除消息").await?;
        Ok(())
    }

    async fn forward_message(
        &self,
        message_id: &str,
        target_conversation_ids: &[String],
    ) -> Result<Vec<Message>> {
        info!(
            "[MsgAPI] 📨 转发消息: messageID={}, 目标会话数: {}",
            message_id,
            target_conversation_ids.len()
        );
        let response = self
            .session
            .request(Method::POST, &format!("/messages/{}/forward", message_id))
            .json(&serde_json::json!({ "targetGroupIds": target_conversation_ids }))
            .send()
            .await
            .context("转发消息请求失败")?;
        handle_http_response::<Vec<Message>>(response, "转发消息")
            .await?
            .into_data("转发消息")
    }
}

fn kind_wire_name(file: &OutgoingAttachment) -> String {
    serde_json::to_value(file.kind())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
