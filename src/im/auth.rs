//! 认证 API
//!
//! 登录、刷新成功后令牌写入凭据缓存，并设置到共享的 HTTP 会话上。

use crate::im::credentials::{CredentialStore, Session};
use crate::im::error::ClientError;
use crate::im::profile::UserProfile;
use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

/// 登录/刷新返回的令牌
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ClientError::Validation("邮箱格式不正确".to_string()).into()),
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::Validation(format!(
            "密码至少需要 {} 位",
            MIN_PASSWORD_LEN
        ))
        .into());
    }
    Ok(())
}

pub struct AuthApi {
    session: HttpSession,
    credentials: CredentialStore,
}

impl AuthApi {
    pub fn new(session: HttpSession, credentials: CredentialStore) -> Self {
        Self {
            session,
            credentials,
        }
    }

    /// 从凭据缓存恢复登录状态
    pub async fn restore(&self) -> Result<Option<Session>> {
        let session = self.credentials.load_session().await?;
        if let Some(s) = &session {
            info!("[Auth] 恢复已保存的会话: userID={}", s.user_id);
            self.session.set_access_token(Some(s.access_token.clone()));
        }
        Ok(session)
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<AuthTokens> {
        validate_email(&req.email)?;
        if req.password.is_empty() {
            return Err(ClientError::Validation("请输入密码".to_string()).into());
        }
        info!("[Auth] 🔐 正在登录: {}", req.email);
        let tokens = self
            .post_json::<_, AuthTokens>("/auth/login", req, "登录")
            .await?;
        self.persist(&tokens).await?;
        info!("[Auth] ✅ 登录成功: userID={}", tokens.user.id);
        Ok(tokens)
    }

    /// 注册后服务端发送验证码，需再调用 [`AuthApi::verify_otp`]
    pub async fn register(&self, req: &RegisterRequest) -> Result<()> {
        if req.username.trim().is_empty() {
            return Err(ClientError::Validation("请输入用户名".to_string()).into());
        }
        validate_email(&req.email)?;
        validate_password(&req.password)?;
        info!("[Auth] 📝 注册账号: {}", req.email);
        self.post_json::<_, serde_json::Value>("/auth/register", req, "注册")
            .await?;
        Ok(())
    }

    /// 校验注册验证码，成功即登录
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<AuthTokens> {
        validate_email(email)?;
        if otp.trim().is_empty() {
            return Err(ClientError::Validation("请输入验证码".to_string()).into());
        }
        let tokens = self
            .post_json::<_, AuthTokens>(
                "/auth/verify-otp",
                &serde_json::json!({ "email": email, "otp": otp.trim() }),
                "验证码校验",
            )
            .await?;
        self.persist(&tokens).await?;
        Ok(tokens)
    }

    /// 用刷新令牌换取新的访问令牌
    pub async fn refresh(&self) -> Result<AuthTokens> {
        let refresh_token = self
            .credentials
            .load_session()
            .await?
            .and_then(|s| s.refresh_token)
            .ok_or(ClientError::NotAuthenticated)?;
        debug!("[Auth] 🔄 刷新访问令牌");
        let mut tokens = self
            .post_json::<_, AuthTokens>(
                "/auth/refresh",
                &serde_json::json!({ "refreshToken": refresh_token }),
                "刷新令牌",
            )
            .await?;
        // 服务端未轮换刷新令牌时沿用旧的
        tokens.refresh_token.get_or_insert(refresh_token);
        self.persist(&tokens).await?;
        Ok(tokens)
    }

    /// 退出登录，服务端失败也会清理本地凭据
    pub async fn logout(&self) -> Result<()> {
        let refresh_token = self
            .credentials
            .load_session()
            .await?
            .and_then(|s| s.refresh_token);
        if let Err(e) = self
            .post_json::<_, serde_json::Value>(
                "/auth/logout",
                &serde_json::json!({ "refreshToken": refresh_token }),
                "退出登录",
            )
            .await
        {
            warn!("[Auth] ⚠️ 服务端退出失败，仍清理本地凭据: {}", e);
        }
        self.session.set_access_token(None);
        self.credentials.clear_session().await?;
        info!("[Auth] 👋 已退出登录");
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        validate_email(email)?;
        self.post_json::<_, serde_json::Value>(
            "/auth/forgot-password",
            &serde_json::json!({ "email": email.trim() }),
            "找回密码",
        )
        .await?;
        Ok(())
    }

    pub async fn reset_password(&self, req: &ResetPasswordRequest) -> Result<()> {
        validate_email(&req.email)?;
        validate_password(&req.new_password)?;
        self.post_json::<_, serde_json::Value>("/auth/reset-password", req, "重置密码")
            .await?;
        Ok(())
    }

    async fn persist(&self, tokens: &AuthTokens) -> Result<()> {
        self.session
            .set_access_token(Some(tokens.access_token.clone()));
        self.credentials
            .save_session(&Session {
                user_id: tokens.user.id.clone(),
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
            })
            .await
    }

    async fn post_json<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        operation: &str,
    ) -> Result<T> {
        let response = self
            .session
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{}请求失败", operation))?;
        let resp = handle_http_response::<T>(response, operation).await?;
        match resp.data {
            Some(data) => Ok(data),
            // 无 data 的接口按 null 解析
            None => serde_json::from_value(serde_json::Value::Null).map_err(|_| {
                anyhow::Error::new(ClientError::Decode(format!(
                    "{}响应中缺少 data 字段",
                    operation
                )))
            }),
        }
    }
}
