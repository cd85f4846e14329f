//! 聊天 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示客户端功能
//! 启动时登录并连接实时通道，只展示接收到的信息；可选发送一条消息到自动选中的会话

use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_client_core::im::conversation::{Conversation, SelectionEffects};
use chat_client_core::im::friend::{FriendListener, FriendRequest};
use chat_client_core::im::profile::UserProfile;
use chat_client_core::{ChatClient, ChatListener, ClientConfig, Message, NotificationPayload};
use clap::Parser;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "chat-cli")]
#[command(about = "聊天 CLI 客户端 - 用于测试和展示消息同步", long_about = None)]
struct Args {
    /// 登录邮箱（有缓存会话时可省略）
    #[arg(short, long, env = "CHAT_EMAIL")]
    email: Option<String>,

    /// 登录密码（有缓存会话时可省略）
    #[arg(short, long, env = "CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// REST API 地址
    #[arg(long, env = "CHAT_API_URL", default_value = "http://localhost:3000/api")]
    api_url: String,

    /// 实时通道地址
    #[arg(long, env = "CHAT_WS_URL", default_value = "ws://localhost:3001")]
    ws_url: String,

    /// 凭据缓存（SQLite）
    #[arg(long, env = "CHAT_DB_URL", default_value = "sqlite://chat-client.db")]
    db_url: String,

    /// 连接后向当前会话发送的文本
    #[arg(long)]
    send: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,chat_client_core=debug）
    #[arg(long, default_value = "info,chat_client_core=debug")]
    log_level: String,
}

/// 没有缓存会话时取登录凭据
fn login_credentials(args: &Args) -> Result<(&str, &str)> {
    match (args.email.as_deref(), args.password.as_deref()) {
        (Some(email), Some(password)) => Ok((email, password)),
        _ => anyhow::bail!("没有已保存的会话，请提供 --email 和 --password"),
    }
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .context("无法创建日志文件 debug.log")?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
    Ok(())
}

/// 输出所有接收到的信息
struct CliListener;

#[async_trait]
impl ChatListener for CliListener {
    async fn on_connection_status_changed(&self, connected: bool, message: String) {
        if connected {
            info!("[CLI/Conn] 🔗 已连接: {}", message);
        } else {
            error!("[CLI/Conn] 🔗 断开连接: {}", message);
        }
    }

    async fn on_recv_new_message(&self, message: Message) {
        info!(
            "[CLI/Message] 📨 新消息 [{}] {}: {}",
            message.conversation_id,
            message.sender_id,
            message.content.as_deref().unwrap_or_else(|| message
                .kind
                .placeholder()
                .unwrap_or_default())
        );
    }

    async fn on_message_edited(&self, message: Message) {
        info!("[CLI/Message] ✏️ 消息已编辑: {}", message.id);
    }

    async fn on_message_recalled(&self, conversation_id: String, message_id: String) {
        info!(
            "[CLI/Message] ↩️ 消息撤回: [{}] {}",
            conversation_id, message_id
        );
    }

    async fn on_messages_changed(&self, _conversation_id: String) {}

    async fn on_conversation_changed(&self, conversation: Conversation) {
        info!(
            "[CLI/Conversation] 🔄 {} | 未读: {} | 最新: {}",
            conversation.name,
            conversation.unread_count,
            conversation
                .last_message
                .as_ref()
                .map(|m| m.preview_text())
                .unwrap_or_default()
        );
    }

    async fn on_conversation_list_changed(&self) {
        info!("[CLI/Conversation] 📋 会话列表已刷新");
    }

    async fn on_total_unread_count_changed(&self, total: u32) {
        info!("[CLI/Conversation] 📬 总未读数: {}", total);
    }

    async fn on_presence_changed(&self, user_id: String) {
        info!("[CLI/Presence] 👤 在线状态变化: {}", user_id);
    }

    async fn on_conversation_selected(&self, effects: SelectionEffects) {
        info!("[CLI/Conversation] 👉 当前会话: {}", effects.conversation_id);
    }

    async fn on_error_notice(&self, notice: String) {
        warn!("[CLI] ⚠️ {}", notice);
    }

    async fn on_push_notification(&self, payload: NotificationPayload) {
        info!("[CLI/Push] 🔔 {}: {}", payload.title, payload.body);
    }
}

struct CliFriendListener;

#[async_trait]
impl FriendListener for CliFriendListener {
    async fn on_friend_list_changed(&self, friends: Vec<UserProfile>) {
        info!("[CLI/Friend] 👥 好友列表（共 {} 个）", friends.len());
    }

    async fn on_friend_request_list_changed(&self, requests: Vec<FriendRequest>) {
        let pending = requests.iter().filter(|r| r.is_pending()).count();
        info!("[CLI/Friend] 📝 好友申请 {} 条，待处理 {} 条", requests.len(), pending);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    info!("[CLI] 🚀 聊天 CLI 客户端（测试模式）");
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let mut config = ClientConfig::new(args.api_url.clone(), args.ws_url.clone());
    config.credentials_db_url = args.db_url.clone();
    let mut client = ChatClient::with_listener(config, Arc::new(CliListener)).await?;
    client.set_friend_listener(Arc::new(CliFriendListener));

    let user_id = match client.restore_session().await? {
        Some(user_id) => user_id,
        None => {
            let (email, password) = login_credentials(&args)?;
            info!("[CLI] 🔐 正在登录: {}", email);
            client.login(email, password).await?.user.id
        }
    };
    info!("[CLI] ✅ 已登录，用户ID: {}", user_id);

    client.connect().await.context("连接失败")?;
    info!("[CLI] ✅ 连接成功！");

    for conv in client.conversations().iter().take(5) {
        info!("[CLI]   - {} | 未读: {}", conv.name, conv.unread_count);
    }
    info!("[CLI] 📬 总未读数: {}", client.total_unread());

    if let Err(e) = client.friends().await?.list_friends().await {
        warn!("[CLI] 好友列表获取失败: {}", e);
    }

    if let Some(text) = &args.send {
        match client.send_message(Some(text), None).await? {
            Some(message) => info!("[CLI] 📤 已发送: {}", message.id),
            None => warn!("[CLI] 没有选中的会话，未发送"),
        }
    }

    info!("[CLI] 📥 开始监听消息...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await.context("监听 Ctrl+C 失败")?;
    }

    client.disconnect().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_optional_until_login_is_needed() {
        let mut args = Args::try_parse_from(["chat-cli", "--duration", "5"]).unwrap();
        args.email = None;
        args.password = None;
        assert!(login_credentials(&args).is_err());
        args.email = Some("a@b.co".into());
        assert!(login_credentials(&args).is_err());

        let args = Args::try_parse_from(["chat-cli", "-e", "a@b.co", "-p", "secret"]).unwrap();
        assert_eq!(login_credentials(&args).unwrap(), ("a@b.co", "secret"));
    }
}
