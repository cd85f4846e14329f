//! SQLite 数据库工具：统一创建连接池并执行 sqlx 迁移
//!
//! 约定：crate 根目录下存在 `migrations/` 目录，存放所有迁移 SQL 文件。

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// 创建 SQLite 连接池并执行所有未执行的迁移
///
/// 内存库每个连接都是独立的库，因此只开一个连接。
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("无效的 SQLite 地址: {}", db_url))?
        .create_if_missing(true);
    let pool_options = if db_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))?;

    sqlx::migrate!().run(&pool).await.context("执行数据库迁移失败")?;

    Ok(pool)
}
