//! 聊天客户端核心实现模块
//!
//! 把认证、实时通道、状态、分页和发送管线组装成一个门面。调用方注册
//! [`ChatListener`] 接收状态变化；失败的操作除了返回错误，还会通过
//! `on_error_notice` 推送一条提示文案。

use crate::im::auth::{AuthApi, AuthTokens, LoginRequest, RegisterRequest, ResetPasswordRequest};
use crate::im::conversation::api::{CreateGroupRequest, GroupApi};
use crate::im::conversation::controller::SelectionEffects;
use crate::im::conversation::models::Conversation;
use crate::im::conversation::pagination::{LoadOlderOutcome, PaginationLoader, ViewportMetrics};
use crate::im::credentials::CredentialStore;
use crate::im::error::ClientError;
use crate::im::friend::{EmptyFriendListener, FriendApi, FriendListener, FriendService};
use crate::im::listener::{forward_changes, ChatListener, EmptyChatListener};
use crate::im::message::api::{MessageApi, MessageBackend};
use crate::im::message::models::Message;
use crate::im::message::send::{OutgoingAttachment, SendPipeline};
use crate::im::presence::OnlineStatus;
use crate::im::profile::{ProfileApi, ProfileUpdate, UserProfile};
use crate::im::push::{NotificationPayload, PushApi};
use crate::im::realtime::adapter::RealtimeEventAdapter;
use crate::im::realtime::events::{InboundEvent, OutboundEvent};
use crate::im::realtime::transport::{RealtimeConnection, RealtimeLink, RealtimeSink};
use crate::im::state::{ChatState, StoreChange, StoreCommand, StoreHandle};
use crate::im::types::HttpSession;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_WS_URL: &str = "ws://localhost:3001";
const DEFAULT_CREDENTIALS_DB_URL: &str = "sqlite://chat-client.db";
const DEFAULT_PAGE_SIZE: u32 = 20;
const REGISTER_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// REST API 基础地址（含路径前缀）
    pub api_base_url: String,
    /// 实时通道地址
    pub ws_url: String,
    /// 凭据缓存的 SQLite 地址，例如 `sqlite://chat-client.db`
    pub credentials_db_url: String,
    /// 每页消息条数
    pub page_size: u32,
    /// 等待 register 回执的时间
    pub register_ack_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_url: ws_url.into(),
            credentials_db_url: DEFAULT_CREDENTIALS_DB_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            register_ack_timeout: REGISTER_ACK_TIMEOUT,
        }
    }

    /// 从 `CHAT_*` 环境变量读取，缺省使用本地开发地址
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new(
            lookup("CHAT_API_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            lookup("CHAT_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        );
        if let Some(db) = lookup("CHAT_DB_URL") {
            config.credentials_db_url = db;
        }
        if let Some(size) = lookup("CHAT_PAGE_SIZE") {
            config.page_size = size
                .parse()
                .with_context(|| format!("CHAT_PAGE_SIZE 不是有效数字: {}", size))?;
        }
        Ok(config)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_WS_URL)
    }
}

/// 聊天客户端
#[derive(Clone)]
pub struct ChatClient {
    config: ClientConfig,
    session: HttpSession,
    credentials: CredentialStore,
    store: StoreHandle,
    listener: Arc<dyn ChatListener>,
    friend_listener: Arc<dyn FriendListener>,
    link: Arc<RealtimeLink>,
    adapter: Arc<RealtimeEventAdapter>,
    pager: Arc<PaginationLoader>,
    pipeline: Arc<SendPipeline>,
    auth: Arc<AuthApi>,
    profile: Arc<ProfileApi>,
    groups: Arc<GroupApi>,
    push: Arc<PushApi>,
    /// 会话列表只在首次连上时自动拉取一次
    initial_sync_started: Arc<AtomicBool>,
    /// 连接代数，旧连接的事件循环结束时不影响新连接
    generation: Arc<AtomicU64>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChatClient {
    /// 创建客户端（使用默认空监听器）
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptyChatListener)).await
    }

    pub async fn with_listener(config: ClientConfig, listener: Arc<dyn ChatListener>) -> Result<Self> {
        let credentials = CredentialStore::open(&config.credentials_db_url).await?;
        let device_id = credentials.device_id().await?;

        // 设备 ID 作为默认请求头，访问令牌由 HttpSession 按请求附加
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("x-device-id"),
                    reqwest::header::HeaderValue::from_str(&device_id)
                        .context("无效的设备 ID")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        let session = HttpSession::new(http_client, config.api_base_url.clone());

        let store = StoreHandle::new(ChatState::new(None));
        let link = Arc::new(RealtimeLink::default());
        let backend: Arc<dyn MessageBackend> = Arc::new(MessageApi::new(session.clone()));

        info!(
            "[Client] 创建客户端: api={}, ws={}, deviceID={}",
            config.api_base_url, config.ws_url, device_id
        );

        Ok(Self {
            adapter: Arc::new(RealtimeEventAdapter::new(store.clone(), listener.clone())),
            pager: Arc::new(PaginationLoader::new(
                store.clone(),
                backend.clone(),
                config.page_size,
            )),
            pipeline: Arc::new(SendPipeline::new(
                store.clone(),
                backend,
                link.clone(),
                listener.clone(),
            )),
            auth: Arc::new(AuthApi::new(session.clone(), credentials.clone())),
            profile: Arc::new(ProfileApi::new(session.clone())),
            groups: Arc::new(GroupApi::new(session.clone())),
            push: Arc::new(PushApi::new(session.clone(), credentials.clone())),
            config,
            session,
            credentials,
            store,
            listener,
            friend_listener: Arc::new(EmptyFriendListener),
            link,
            initial_sync_started: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            reader: Arc::new(Mutex::new(None)),
        })
    }

    /// 注册好友监听器
    pub fn set_friend_listener(&mut self, listener: Arc<dyn FriendListener>) {
        self.friend_listener = listener;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn local_user_id(&self) -> Option<String> {
        self.store.read(|s| s.local_user_id().map(str::to_string))
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.store
            .read(|s| s.active_conversation().map(str::to_string))
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.read(|s| s.conversations().to_vec())
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.store
            .read(|s| s.messages().messages(conversation_id).to_vec())
    }

    pub fn total_unread(&self) -> u32 {
        self.store.read(|s| s.messages().total_unread())
    }

    pub fn presence_of(&self, user_id: &str, conversation_id: &str) -> OnlineStatus {
        self.store
            .read(|s| s.presence().status_of(user_id, conversation_id))
    }

    /// 失败时推送提示文案，错误原样返回
    async fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!("[Client] ❌ {}失败: {:#}", operation, e);
            self.listener
                .on_error_notice(ClientError::notice_for(e))
                .await;
        }
        result
    }

    async fn set_local_user(&self, user_id: Option<String>) {
        let changes = self.store.dispatch(StoreCommand::SetLocalUser(user_id));
        forward_changes(&self.listener, changes).await;
    }

    // ---------------------------------------------------------------
    // 认证
    // ---------------------------------------------------------------

    /// 从凭据缓存恢复登录，返回恢复的用户 ID
    pub async fn restore_session(&self) -> Result<Option<String>> {
        let session = self.auth.restore().await?;
        let user_id = session.map(|s| s.user_id);
        if user_id.is_some() {
            self.set_local_user(user_id.clone()).await;
        }
        Ok(user_id)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthTokens> {
        let result = self
            .auth
            .login(&LoginRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await;
        let tokens = self.report("登录", result).await?;
        self.set_local_user(Some(tokens.user.id.clone())).await;
        Ok(tokens)
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<()> {
        let result = self
            .auth
            .register(&RegisterRequest {
                username: username.trim().to_string(),
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await;
        self.report("注册", result).await
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<AuthTokens> {
        let result = self.auth.verify_otp(email, otp).await;
        let tokens = self.report("验证码校验", result).await?;
        self.set_local_user(Some(tokens.user.id.clone())).await;
        Ok(tokens)
    }

    pub async fn refresh_token(&self) -> Result<AuthTokens> {
        let result = self.auth.refresh().await;
        self.report("刷新令牌", result).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let result = self.auth.forgot_password(email).await;
        self.report("找回密码", result).await?;
        if self.link.is_connected().await {
            if let Err(e) = self
                .link
                .emit(OutboundEvent::ResetPassword {
                    email: email.trim().to_string(),
                })
                .await
            {
                warn!("[Client] ⚠️ resetPassword 通知失败: {}", e);
            }
        }
        Ok(())
    }

    pub async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<()> {
        let result = self
            .auth
            .reset_password(&ResetPasswordRequest {
                email: email.trim().to_string(),
                otp: otp.trim().to_string(),
                new_password: new_password.to_string(),
            })
            .await;
        self.report("重置密码", result).await
    }

    /// 断开实时通道、清理凭据和内存状态
    pub async fn logout(&self) -> Result<()> {
        self.disconnect().await;
        let result = self.auth.logout().await;
        self.store.reset();
        self.initial_sync_started.store(false, Ordering::SeqCst);
        self.listener.on_conversation_list_changed().await;
        self.listener.on_total_unread_count_changed(0).await;
        self.report("退出登录", result).await
    }

    // ---------------------------------------------------------------
    // 实时通道
    // ---------------------------------------------------------------

    /// 连接实时通道并完成注册
    pub async fn connect(&self) -> Result<()> {
        let result = self.connect_inner().await;
        self.report("连接实时通道", result).await
    }

    async fn connect_inner(&self) -> Result<()> {
        let user_id = self.local_user_id().ok_or(ClientError::NotAuthenticated)?;
        let token = self
            .session
            .access_token()
            .ok_or(ClientError::NotAuthenticated)?;

        let (conn, read) = RealtimeConnection::connect(&self.config.ws_url, &token, &user_id).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = conn.spawn_reader(read, tx);
        self.link.attach(conn).await;
        if let Some(old) = self.reader.lock().await.replace(reader) {
            old.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let client = self.clone();
        tokio::spawn(async move {
            info!("[Client] 📥 开始处理实时事件 (generation={})", generation);
            client.run_event_loop(rx, generation).await;
        });

        self.listener
            .on_connection_status_changed(true, "连接成功".to_string())
            .await;
        self.on_connection_established(&user_id).await
    }

    /// 连接建立：注册身份，首次连接时拉取会话列表并自动选中第一个会话
    async fn on_connection_established(&self, user_id: &str) -> Result<()> {
        self.link
            .emit_with_ack(
                OutboundEvent::Register {
                    user_id: user_id.to_string(),
                },
                self.config.register_ack_timeout,
            )
            .await
            .context("实时通道注册失败")?;
        info!("[Client] ✅ 实时通道注册成功: userID={}", user_id);

        if self.initial_sync_started.swap(true, Ordering::SeqCst) {
            debug!("[Client] 会话列表已同步过，跳过");
            return Ok(());
        }
        let conversations = match self.refresh_conversations().await {
            Ok(list) => list,
            Err(e) => {
                // 下次连接时再试
                self.initial_sync_started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        if self.active_conversation().is_none() {
            if let Some(first) = conversations.first() {
                info!("[Client] 自动选中第一个会话: {}", first.id);
                self.select_conversation(&first.id).await?;
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        if self.link.is_connected().await {
            self.link.detach().await;
            self.listener
                .on_connection_status_changed(false, "已断开连接".to_string())
                .await;
        }
    }

    async fn run_event_loop(&self, mut rx: mpsc::UnboundedReceiver<InboundEvent>, generation: u64) {
        while let Some(event) = rx.recv().await {
            self.handle_inbound(event).await;
        }
        if self.generation.load(Ordering::SeqCst) == generation && self.link.is_connected().await {
            warn!("[Client] 👋 实时通道已断开");
            self.link.detach().await;
            self.listener
                .on_connection_status_changed(false, "连接已断开".to_string())
                .await;
        }
    }

    /// 处理一条入站事件
    pub async fn handle_inbound(&self, event: InboundEvent) {
        let new_message = match &event {
            InboundEvent::NotifyMessage(notice) => Some(notice.message.clone()),
            InboundEvent::NewMessage(message) => Some(message.clone()),
            _ => None,
        };
        self.adapter.handle(event).await;
        if let Some(message) = new_message {
            self.after_new_message(message).await;
        }
    }

    async fn after_new_message(&self, message: Message) {
        let (known, is_active, me) = self.store.read(|s| {
            (
                s.conversation(&message.conversation_id).is_some(),
                s.active_conversation() == Some(message.conversation_id.as_str()),
                s.local_user_id().map(str::to_string),
            )
        });

        if !known {
            info!(
                "[Client] 收到未知会话的消息，刷新会话列表: {}",
                message.conversation_id
            );
            // 后台同步，失败只记日志
            match self.groups.list_groups().await {
                Ok(conversations) => self.apply_conversation_list(conversations).await,
                Err(e) => warn!("[Client] ⚠️ 刷新会话列表失败: {:#}", e),
            }
        }

        // 当前会话收到别人的消息，直接回执已读
        if let Some(me) = me {
            if is_active && message.sender_id != me {
                self.mark_read(&message.conversation_id, &me, vec![message.id.clone()])
                    .await;
            }
        }
    }

    /// 发送 markAsRead 并在本地记录自己已读
    async fn mark_read(&self, conversation_id: &str, me: &str, message_ids: Vec<String>) {
        if let Err(e) = self
            .link
            .emit(OutboundEvent::MarkAsRead {
                conversation_id: conversation_id.to_string(),
                user_id: me.to_string(),
                message_ids: message_ids.clone(),
            })
            .await
        {
            warn!("[Client] ⚠️ markAsRead 发送失败: {}", e);
        }
        if message_ids.is_empty() {
            return;
        }
        let changes = self.store.dispatch(StoreCommand::MarkRead {
            conversation_id: conversation_id.to_string(),
            message_ids,
            reader_id: me.to_string(),
        });
        forward_changes(&self.listener, changes).await;
    }

    fn unread_by(&self, conversation_id: &str, me: &str) -> Vec<String> {
        self.store.read(|s| {
            s.messages()
                .messages(conversation_id)
                .iter()
                .filter(|m| m.sender_id != me && !m.is_read_by(me))
                .map(|m| m.id.clone())
                .collect()
        })
    }

    // ---------------------------------------------------------------
    // 会话
    // ---------------------------------------------------------------

    /// 拉取会话列表并替换本地列表
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let result = self.groups.list_groups().await;
        let conversations = self.report("拉取会话列表", result).await?;
        self.apply_conversation_list(conversations.clone()).await;
        Ok(conversations)
    }

    async fn apply_conversation_list(&self, conversations: Vec<Conversation>) {
        let changes = self
            .store
            .dispatch(StoreCommand::SetConversations(conversations));
        forward_changes(&self.listener, changes).await;
    }

    pub async fn create_group(&self, req: &CreateGroupRequest) -> Result<Conversation> {
        let result = self.groups.create_group(req).await;
        let conversation = self.report("创建群组", result).await?;
        let changes = self
            .store
            .dispatch(StoreCommand::UpsertConversation(conversation.clone()));
        forward_changes(&self.listener, changes).await;
        Ok(conversation)
    }

    /// 选中会话：清零未读、通知服务端、必要时加载首屏
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<SelectionEffects> {
        let changes = self.store.dispatch(StoreCommand::Select {
            conversation_id: conversation_id.to_string(),
        });
        let effects = changes
            .iter()
            .find_map(|c| match c {
                StoreChange::Selected(effects) => Some(effects.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("选中会话未产生视图动作: {}", conversation_id))?;
        forward_changes(&self.listener, changes).await;
        info!(
            "[Client] 选中会话: {}, 首屏加载: {}, 滚动到底部: {}",
            conversation_id, effects.initial_load, effects.scroll_to_bottom
        );

        let me = self.local_user_id();
        if let Some(me) = &me {
            if let Err(e) = self
                .link
                .emit(OutboundEvent::Open {
                    conversation_id: conversation_id.to_string(),
                    user_id: me.clone(),
                })
                .await
            {
                warn!("[Client] ⚠️ open 发送失败: {}", e);
            }
            if effects.emit_read_receipt {
                let unread = self.unread_by(conversation_id, me);
                self.mark_read(conversation_id, me, unread).await;
            }
        }

        if effects.initial_load {
            let result = self.pager.load_initial(conversation_id).await;
            if let Some((_, changes)) = self.report("加载消息", result).await? {
                forward_changes(&self.listener, changes).await;
            }
            // 首屏里别人发来的未读消息
            if let Some(me) = &me {
                let unread = self.unread_by(conversation_id, me);
                if !unread.is_empty() {
                    self.mark_read(conversation_id, me, unread).await;
                }
            }
        }
        Ok(effects)
    }

    /// 加载当前会话更早的一页
    pub async fn load_older(&self, viewport: ViewportMetrics) -> Result<LoadOlderOutcome> {
        let Some(conversation_id) = self.active_conversation() else {
            return Ok(LoadOlderOutcome::Skipped);
        };
        let result = self.pager.load_older(&conversation_id, viewport).await;
        let outcome = self.report("加载历史消息", result).await?;
        match &outcome {
            LoadOlderOutcome::Loaded { count, .. } | LoadOlderOutcome::Stale { count }
                if *count > 0 =>
            {
                self.listener.on_messages_changed(conversation_id).await
            }
            _ => {}
        }
        Ok(outcome)
    }

    // ---------------------------------------------------------------
    // 消息
    // ---------------------------------------------------------------

    /// 向当前会话发送消息
    pub async fn send_message(
        &self,
        text: Option<&str>,
        attachment: Option<OutgoingAttachment>,
    ) -> Result<Option<Message>> {
        let conversation_id = self.active_conversation().unwrap_or_default();
        let result = self.pipeline.send(&conversation_id, text, attachment).await;
        self.report("发送消息", result).await
    }

    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Message> {
        let result = self
            .pipeline
            .edit(conversation_id, message_id, content)
            .await;
        self.report("编辑消息", result).await
    }

    pub async fn recall_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let result = self.pipeline.recall(conversation_id, message_id).await;
        self.report("撤回消息", result).await
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let result = self.pipeline.delete(conversation_id, message_id).await;
        self.report("删除消息", result).await
    }

    pub async fn forward_message(&self, message_id: &str, targets: &[String]) -> Result<Vec<Message>> {
        let result = self.pipeline.forward(message_id, targets).await;
        self.report("转发消息", result).await
    }

    // ---------------------------------------------------------------
    // 好友、资料、推送
    // ---------------------------------------------------------------

    /// 好友服务（需已登录）
    pub async fn friends(&self) -> Result<FriendService> {
        let me = self.local_user_id().ok_or(ClientError::NotAuthenticated)?;
        let service = FriendService::with_listener(
            FriendApi::new(self.session.clone()),
            me,
            self.friend_listener.clone(),
        );
        service.set_sink(Some(self.link.clone())).await;
        Ok(service)
    }

    pub async fn get_profile(&self) -> Result<UserProfile> {
        let result = self.profile.get_profile().await;
        self.report("获取个人资料", result).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let result = self.profile.update_profile(update).await;
        self.report("更新个人资料", result).await
    }

    pub async fn register_push_token(&self, token: &str, platform: &str) -> Result<bool> {
        let result = self.push.register_token(token, platform).await;
        self.report("注册推送令牌", result).await
    }

    /// 归一化推送载荷并交给监听器
    pub async fn handle_push_payload(&self, raw: &serde_json::Value) -> Option<NotificationPayload> {
        let payload = NotificationPayload::normalize(raw)?;
        self.listener.on_push_notification(payload.clone()).await;
        Some(payload)
    }
}
