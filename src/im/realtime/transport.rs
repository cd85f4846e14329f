//! 实时通道传输层（WebSocket）
//!
//! 只负责收发帧、心跳和回执匹配；不做重连，断开后由上层决定是否重新连接。

use crate::im::error::ClientError;
use crate::im::realtime::events::{AckNotice, InboundEvent, OutboundEvent};
use crate::im::serialization::{frame_to_text, generate_request_id};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 出站事件发送端（便于在测试中替换）
#[async_trait]
pub trait RealtimeSink: Send + Sync {
    /// 发送事件，不等待回执
    async fn emit(&self, event: OutboundEvent) -> Result<()>;

    /// 发送事件并等待服务端回执
    async fn emit_with_ack(&self, event: OutboundEvent, timeout: Duration) -> Result<AckNotice>;
}

type PendingAcks = Arc<std::sync::Mutex<HashMap<String, oneshot::Sender<AckNotice>>>>;

/// 已建立的实时连接
#[derive(Clone)]
pub struct RealtimeConnection {
    writer: Arc<Mutex<WsWriter>>,
    pending_acks: PendingAcks,
}

impl RealtimeConnection {
    /// 构建连接 URL
    pub fn build_url(ws_url: &str, token: &str, user_id: &str) -> String {
        format!(
            "{}/?token={}&userId={}&operationID={}",
            ws_url.trim_end_matches('/'),
            token,
            user_id,
            generate_request_id()
        )
    }

    /// 建立连接并启动心跳，返回连接与读取端
    pub async fn connect(ws_url: &str, token: &str, user_id: &str) -> Result<(Self, WsReader)> {
        let url = Self::build_url(ws_url, token, user_id);
        info!("[Realtime] 🔗 连接实时通道 (user={})", user_id);

        let (ws_stream, response) = connect_async(&url)
            .await
            .context("WebSocket 连接失败")?;
        info!(
            "[Realtime] ✅ WebSocket 连接成功, 状态: {}",
            response.status()
        );

        let (write, read) = ws_stream.split();
        let conn = Self {
            writer: Arc::new(Mutex::new(write)),
            pending_acks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        };
        conn.spawn_heartbeat();
        Ok((conn, read))
    }

    fn spawn_heartbeat(&self) {
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                let mut w = writer.lock().await;
                if w.send(WsMessage::Ping(vec![])).await.is_err() {
                    debug!("[Realtime] 心跳发送失败，停止心跳");
                    break;
                }
            }
        });
    }

    /// 启动读取任务：回执在这里匹配，其余事件按到达顺序投递到 `tx`
    ///
    /// 连接关闭后任务结束并丢弃 `tx`，接收端据此感知断开。
    pub fn spawn_reader(
        &self,
        mut read: WsReader,
        tx: mpsc::UnboundedSender<InboundEvent>,
    ) -> JoinHandle<()> {
        let pending = self.pending_acks.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                let text = match msg_result {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(data)) => match frame_to_text(&data) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("[Realtime] 二进制帧解码失败: {}", e);
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        warn!("[Realtime] 👋 连接关闭: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("[Realtime] WebSocket 错误: {}", e);
                        break;
                    }
                };

                match InboundEvent::parse(&text) {
                    Ok(InboundEvent::Ack(ack)) => resolve_ack(&pending, ack),
                    Ok(event) => {
                        debug!("[Realtime] 📥 收到事件: {}", event.name());
                        if tx.send(event).is_err() {
                            debug!("[Realtime] 事件接收端已关闭，停止读取");
                            break;
                        }
                    }
                    Err(e) => warn!("[Realtime] ⚠️ 丢弃无法识别的帧: {}, 原始数据: {}", e, text),
                }
            }
            // 唤醒所有还在等待的回执
            if let Ok(mut map) = pending.lock() {
                map.clear();
            }
        })
    }

    async fn send_frame(&self, frame: String) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.send(WsMessage::Text(frame))
            .await
            .map_err(|e| anyhow::Error::new(ClientError::NotConnected).context(e.to_string()))
    }
}

fn resolve_ack(pending: &PendingAcks, ack: AckNotice) {
    let sender = pending
        .lock()
        .ok()
        .and_then(|mut map| map.remove(&ack.ack_id));
    match sender {
        Some(tx) => {
            let _ = tx.send(ack);
        }
        None => debug!("[Realtime] 收到未知回执: ackId={}", ack.ack_id),
    }
}

#[async_trait]
impl RealtimeSink for RealtimeConnection {
    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        debug!("[Realtime] 📤 发送事件: {}", event.name());
        let frame = event.to_frame(None)?;
        self.send_frame(frame).await
    }

    async fn emit_with_ack(&self, event: OutboundEvent, timeout: Duration) -> Result<AckNotice> {
        let ack_id = generate_request_id();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.pending_acks.lock() {
            map.insert(ack_id.clone(), tx);
        }

        debug!(
            "[Realtime] 📤 发送事件并等待回执: {}, ackId={}",
            event.name(),
            ack_id
        );
        let frame = event.to_frame(Some(&ack_id))?;
        if let Err(e) = self.send_frame(frame).await {
            if let Ok(mut map) = self.pending_acks.lock() {
                map.remove(&ack_id);
            }
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) if ack.ok => Ok(ack),
            Ok(Ok(ack)) => Err(ClientError::Api {
                status_code: 0,
                message: ack.message.unwrap_or_else(|| format!("{} 被拒绝", event.name())),
            }
            .into()),
            Ok(Err(_)) => Err(ClientError::NotConnected.into()),
            Err(_) => {
                if let Ok(mut map) = self.pending_acks.lock() {
                    map.remove(&ack_id);
                }
                Err(ClientError::AckTimeout(event.name().to_string()).into())
            }
        }
    }
}

/// 可替换的连接句柄
///
/// 上层持有同一个句柄，重连时只替换内部连接；未连接时发送返回 [`ClientError::NotConnected`]。
#[derive(Default)]
pub struct RealtimeLink {
    conn: tokio::sync::RwLock<Option<RealtimeConnection>>,
}

impl RealtimeLink {
    pub async fn attach(&self, conn: RealtimeConnection) {
        *self.conn.write().await = Some(conn);
    }

    pub async fn detach(&self) {
        *self.conn.write().await = None;
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    async fn current(&self) -> Result<RealtimeConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::NotConnected.into())
    }
}

#[async_trait]
impl RealtimeSink for RealtimeLink {
    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        self.current().await?.emit(event).await
    }

    async fn emit_with_ack(&self, event: OutboundEvent, timeout: Duration) -> Result<AckNotice> {
        self.current().await?.emit_with_ack(event, timeout).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_identity() {
        let url = RealtimeConnection::build_url("ws://localhost:3001/", "tok", "u1");
        assert!(url.starts_with("ws://localhost:3001/?token=tok&userId=u1&operationID="));
    }

    #[tokio::test]
    async fn detached_link_reports_not_connected() {
        let link = RealtimeLink::default();
        assert!(!link.is_connected().await);
        let err = link
            .emit(OutboundEvent::Register {
                user_id: "u1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ClientError>(),
            Some(&ClientError::NotConnected)
        );
    }

    #[test]
    fn ack_resolution_removes_pending_entry() {
        let pending: PendingAcks = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert("a1".into(), tx);

        resolve_ack(
            &pending,
            AckNotice {
                ack_id: "a1".into(),
                ok: true,
                message: None,
            },
        );
        assert!(pending.lock().unwrap().is_empty());
        assert!(rx.try_recv().unwrap().ok);

        // 重复回执不会 panic
        resolve_ack(
            &pending,
            AckNotice {
                ack_id: "a1".into(),
                ok: true,
                message: None,
            },
        );
    }
}
