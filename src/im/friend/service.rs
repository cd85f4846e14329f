//! 好友服务层
//!
//! HTTP 操作成功后通过实时通道通知对方，并刷新本地监听器看到的列表。

use crate::im::friend::api::FriendApi;
use crate::im::friend::listener::{EmptyFriendListener, FriendListener};
use crate::im::friend::models::FriendRequest;
use crate::im::profile::UserProfile;
use crate::im::realtime::events::{FriendAction, OutboundEvent};
use crate::im::realtime::transport::RealtimeSink;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct FriendService {
    api: FriendApi,
    user_id: String,
    sink: RwLock<Option<Arc<dyn RealtimeSink>>>,
    listener: Arc<dyn FriendListener>,
}

impl FriendService {
    pub fn new(api: FriendApi, user_id: String) -> Self {
        Self::with_listener(api, user_id, Arc::new(EmptyFriendListener))
    }

    pub fn with_listener(api: FriendApi, user_id: String, listener: Arc<dyn FriendListener>) -> Self {
        Self {
            api,
            user_id,
            sink: RwLock::new(None),
            listener,
        }
    }

    /// 实时通道连上/断开时更新
    pub async fn set_sink(&self, sink: Option<Arc<dyn RealtimeSink>>) {
        *self.sink.write().await = sink;
    }

    pub async fn list_friends(&self) -> Result<Vec<UserProfile>> {
        let friends = self.api.list_friends().await?;
        self.listener.on_friend_list_changed(friends.clone()).await;
        Ok(friends)
    }

    pub async fn list_requests(&self) -> Result<Vec<FriendRequest>> {
        let requests = self.api.list_requests().await?;
        self.listener
            .on_friend_request_list_changed(requests.clone())
            .await;
        Ok(requests)
    }

    pub async fn send_request(&self, target_user_id: &str) -> Result<FriendRequest> {
        let request = self.api.send_request(target_user_id).await?;
        self.notify(FriendAction::Request, target_user_id, Some(&request.id))
            .await;
        self.list_requests().await?;
        Ok(request)
    }

    pub async fn accept_request(&self, request: &FriendRequest) -> Result<()> {
        self.api.accept_request(&request.id).await?;
        self.notify(
            FriendAction::Accept,
            request.counterpart(&self.user_id),
            Some(&request.id),
        )
        .await;
        self.list_requests().await?;
        self.list_friends().await?;
        Ok(())
    }

    pub async fn reject_request(&self, request: &FriendRequest) -> Result<()> {
        self.api.reject_request(&request.id).await?;
        self.notify(
            FriendAction::Reject,
            request.counterpart(&self.user_id),
            Some(&request.id),
        )
        .await;
        self.list_requests().await?;
        Ok(())
    }

    pub async fn cancel_request(&self, request: &FriendRequest) -> Result<()> {
        self.api.cancel_request(&request.id).await?;
        self.list_requests().await?;
        Ok(())
    }

    async fn notify(&self, action: FriendAction, target_user_id: &str, request_id: Option<&str>) {
        let Some(sink) = self.sink.read().await.clone() else {
            info!("[FriendSvc] 实时通道未连接，跳过通知: {:?}", action);
            return;
        };
        let event = OutboundEvent::HandleFriend {
            action,
            target_user_id: target_user_id.to_string(),
            request_id: request_id.map(str::to_string),
        };
        if let Err(e) = sink.emit(event).await {
            warn!("[FriendSvc] ⚠️ 好友事件通知失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::friend::models::FriendRequestStatus;
    use crate::im::realtime::transport::recording::RecordingSink;
    use crate::im::types::HttpSession;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingListener {
        friends: Mutex<Vec<usize>>,
        requests: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl FriendListener for CountingListener {
        async fn on_friend_list_changed(&self, friends: Vec<UserProfile>) {
            self.friends.lock().unwrap().push(friends.len());
        }

        async fn on_friend_request_list_changed(&self, requests: Vec<FriendRequest>) {
            self.requests.lock().unwrap().push(requests.len());
        }
    }

    fn ok(data: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "statusCode": 200,
            "message": "ok",
            "data": data
        }))
    }

    #[tokio::test]
    async fn accept_notifies_sender_and_refreshes_lists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/friends/requests/r1/accept"))
            .respond_with(ok(json!(null)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/friends/requests"))
            .respond_with(ok(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/friends"))
            .respond_with(ok(json!([{ "id": "u2", "username": "bob" }])))
            .mount(&server)
            .await;

        let listener = Arc::new(CountingListener::default());
        let service = FriendService::with_listener(
            FriendApi::new(HttpSession::new(reqwest::Client::new(), server.uri())),
            "me".into(),
            listener.clone(),
        );
        let sink = Arc::new(RecordingSink::default());
        service.set_sink(Some(sink.clone())).await;

        let request = FriendRequest {
            id: "r1".into(),
            from_user_id: "u2".into(),
            to_user_id: "me".into(),
            status: FriendRequestStatus::Pending,
            created_at: None,
        };
        service.accept_request(&request).await.unwrap();

        assert_eq!(
            sink.emitted(),
            vec![OutboundEvent::HandleFriend {
                action: FriendAction::Accept,
                target_user_id: "u2".into(),
                request_id: Some("r1".into()),
            }]
        );
        assert_eq!(*listener.requests.lock().unwrap(), vec![0]);
        assert_eq!(*listener.friends.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn failed_request_emits_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/friends/requests/r1/reject"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": "error",
                "statusCode": 404,
                "message": "not found"
            })))
            .mount(&server)
            .await;

        let service = FriendService::new(
            FriendApi::new(HttpSession::new(reqwest::Client::new(), server.uri())),
            "me".into(),
        );
        let sink = Arc::new(RecordingSink::default());
        service.set_sink(Some(sink.clone())).await;

        let request = FriendRequest {
            id: "r1".into(),
            from_user_id: "u2".into(),
            to_user_id: "me".into(),
            status: FriendRequestStatus::Pending,
            created_at: None,
        };
        assert!(service.reject_request(&request).await.is_err());
        assert!(sink.emitted().is_empty());
    }
}
