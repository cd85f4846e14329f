//! 凭据缓存
//!
//! 保存登录令牌、设备 ID 和已注册的推送令牌。键值表，值为字符串。

use crate::im::db::create_sqlite_pool_with_migration;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

const KEY_SESSION: &str = "session";
const KEY_DEVICE_ID: &str = "device_id";
const KEY_PUSH_TOKEN: &str = "push_token";

/// 登录会话
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: Pool<Sqlite>,
}

impl CredentialStore {
    pub async fn open(db_url: &str) -> Result<Self> {
        info!("[Credentials] 打开凭据缓存: {}", db_url);
        let pool = create_sqlite_pool_with_migration(db_url).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM credentials WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("读取凭据失败: {}", key))?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        debug!("[Credentials] 写入: {}", key);
        sqlx::query(
            r#"
            INSERT INTO credentials (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("写入凭据失败: {}", key))?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("删除凭据失败: {}", key))?;
        Ok(())
    }

    pub async fn load_session(&self) -> Result<Option<Session>> {
        match self.get(KEY_SESSION).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("凭据缓存中的会话数据损坏")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.set(KEY_SESSION, &serde_json::to_string(session)?).await
    }

    /// 退出登录：会话和推送令牌一起清除，设备 ID 保留
    pub async fn clear_session(&self) -> Result<()> {
        self.remove(KEY_SESSION).await?;
        self.remove(KEY_PUSH_TOKEN).await
    }

    /// 设备 ID 首次使用时生成并持久化
    pub async fn device_id(&self) -> Result<String> {
        if let Some(id) = self.get(KEY_DEVICE_ID).await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set(KEY_DEVICE_ID, &id).await?;
        info!("[Credentials] 生成新设备 ID: {}", id);
        Ok(id)
    }

    pub async fn push_token(&self) -> Result<Option<String>> {
        self.get(KEY_PUSH_TOKEN).await
    }

    pub async fn set_push_token(&self, token: &str) -> Result<()> {
        self.set(KEY_PUSH_TOKEN, token).await
    }
}
