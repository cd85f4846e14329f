//! 推送通知
//!
//! 令牌注册结果缓存在凭据库里，令牌不变就不重复注册。前台和后台收到的载荷结构
//! 不同（`notification` 块或只有 `data` 块），统一归一化为 [`NotificationPayload`]。

use crate::im::credentials::CredentialStore;
use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// 归一化后的通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    /// 点击后打开的链接（通常指向某个会话）
    pub link: Option<String>,
    /// 同一 tag 的通知互相覆盖
    pub tag: Option<String>,
}

fn str_field(block: Option<&Value>, key: &str) -> Option<String> {
    block
        .and_then(|b| b.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl NotificationPayload {
    /// 标题和正文都取不到时返回 None
    pub fn normalize(raw: &Value) -> Option<Self> {
        let notification = raw.get("notification");
        let data = raw.get("data");
        let web_options = raw.get("fcmOptions").or_else(|| raw.get("webpush"));

        let pick = |key: &str| str_field(notification, key).or_else(|| str_field(data, key));

        let title = pick("title");
        let body = pick("body");
        if title.is_none() && body.is_none() {
            debug!("[Push] 载荷缺少标题和正文，忽略");
            return None;
        }

        Some(Self {
            title: title.unwrap_or_default(),
            body: body.unwrap_or_default(),
            image: pick("image").or_else(|| pick("icon")),
            link: str_field(data, "link")
                .or_else(|| str_field(web_options, "link"))
                .or_else(|| {
                    str_field(data, "conversationId")
                        .or_else(|| str_field(data, "groupId"))
                        .map(|id| format!("/chat/{}", id))
                }),
            tag: pick("tag")
                .or_else(|| str_field(data, "conversationId"))
                .or_else(|| str_field(data, "groupId")),
        })
    }
}

pub struct PushApi {
    session: HttpSession,
    credentials: CredentialStore,
}

impl PushApi {
    pub fn new(session: HttpSession, credentials: CredentialStore) -> Self {
        Self {
            session,
            credentials,
        }
    }

    /// 注册推送令牌，返回是否真的发起了注册
    pub async fn register_token(&self, token: &str, platform: &str) -> Result<bool> {
        if self.credentials.push_token().await?.as_deref() == Some(token) {
            debug!("[Push] 令牌未变化，跳过注册");
            return Ok(false);
        }
        info!("[Push] 📲 注册推送令牌: platform={}", platform);
        let response = self
            .session
            .request(Method::POST, "/push/tokens")
            .json(&serde_json::json!({ "token": token, "platform": platform }))
            .send()
            .await
            .context("注册推送令牌请求失败")?;
        handle_http_response::<Value>(response, "注册推送令牌").await?;
        self.credentials.set_push_token(token).await?;
        Ok(true)
    }
}
