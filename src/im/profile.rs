//! 个人资料

use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 用户资料（好友列表也使用该结构）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl UserProfile {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// 资料修改，只序列化有值的字段
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

pub struct ProfileApi {
    session: HttpSession,
}

impl ProfileApi {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    pub async fn get_profile(&self) -> Result<UserProfile> {
        let response = self
            .session
            .request(Method::GET, "/users/me")
            .send()
            .await
            .context("获取个人资料请求失败")?;
        handle_http_response::<UserProfile>(response, "获取个人资料")
            .await?
            .into_data("获取个人资料")
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        info!("[ProfileAPI] ✏️ 更新个人资料");
        let response = self
            .session
            .request(Method::PATCH, "/users/me")
            .json(update)
            .send()
            .await
            .context("更新个人资料请求失败")?;
        handle_http_response::<UserProfile>(response, "更新个人资料")
            .await?
            .into_data("更新个人资料")
    }
}
