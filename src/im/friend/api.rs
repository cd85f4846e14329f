//! 好友 HTTP API 客户端
//!
//! 负责所有好友相关的 HTTP 请求

use crate::im::error::ClientError;
use crate::im::friend::models::FriendRequest;
use crate::im::profile::UserProfile;
use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use reqwest::Method;
use tracing::{debug, info};

/// 好友相关的 HTTP API 客户端
pub struct FriendApi {
    session: HttpSession,
}

impl FriendApi {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    /// 全量好友列表
    pub async fn list_friends(&self) -> Result<Vec<UserProfile>> {
        info!("[FriendAPI] 📡 请求好友列表");
        let response = self
            .session
            .request(Method::GET, "/friends")
            .send()
            .await
            .context("好友列表请求失败")?;
        let friends = handle_http_response::<Vec<UserProfile>>(response, "好友列表")
            .await?
            .data
            .unwrap_or_default();
        debug!("[FriendAPI] 好友数: {}", friends.len());
        Ok(friends)
    }

    /// 收到和发出的全部好友申请
    pub async fn list_requests(&self) -> Result<Vec<FriendRequest>> {
        info!("[FriendAPI] 📡 请求好友申请列表");
        let response = self
            .session
            .request(Method::GET, "/friends/requests")
            .send()
            .await
            .context("好友申请列表请求失败")?;
        Ok(
            handle_http_response::<Vec<FriendRequest>>(response, "好友申请列表")
                .await?
                .data
                .unwrap_or_default(),
        )
    }

    pub async fn send_request(&self, target_user_id: &str) -> Result<FriendRequest> {
        if target_user_id.trim().is_empty() {
            return Err(ClientError::Validation("请输入对方用户 ID".to_string()).into());
        }
        info!("[FriendAPI] ➕ 发送好友申请: target={}", target_user_id);
        let response = self
            .session
            .request(Method::POST, "/friends/requests")
            .json(&serde_json::json!({ "targetUserId": target_user_id }))
            .send()
            .await
            .context("发送好友申请请求失败")?;
        handle_http_response::<FriendRequest>(response, "发送好友申请")
            .await?
            .into_data("发送好友申请")
    }

    pub async fn accept_request(&self, request_id: &str) -> Result<()> {
        self.act_on_request(request_id, "accept", "同意好友申请").await
    }

    pub async fn reject_request(&self, request_id: &str) -> Result<()> {
        self.act_on_request(request_id, "reject", "拒绝好友申请").await
    }

    pub async fn cancel_request(&self, request_id: &str) -> Result<()> {
        self.act_on_request(request_id, "cancel", "撤销好友申请").await
    }

    async fn act_on_request(&self, request_id: &str, action: &str, operation: &str) -> Result<()> {
        info!("[FriendAPI] {}: requestID={}", operation, request_id);
        let response = self
            .session
            .request(
                Method::POST,
                &format!("/friends/requests/{}/{}", request_id, action),
            )
            .send()
            .await
            .with_context(|| format!("{}请求失败", operation))?;
        handle_http_response::<serde_json::Value>(response, operation).await?;
        Ok(())
    }
}
