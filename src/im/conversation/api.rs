//! 群组（会话）HTTP API 客户端

use crate::im::conversation::models::Conversation;
use crate::im::error::ClientError;
use crate::im::types::{handle_http_response, HttpSession};
use anyhow::{Context, Result};
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, info};

/// 创建群组请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// 会话相关的 HTTP API 客户端
pub struct GroupApi {
    session: HttpSession,
}

impl GroupApi {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    /// 拉取当前用户的全部会话
    pub async fn list_groups(&self) -> Result<Vec<Conversation>> {
        info!("[GroupAPI] 📡 拉取会话列表");
        let response = self
            .session
            .request(Method::GET, "/groups")
            .send()
            .await
            .context("拉取会话列表请求失败")?;
        let groups = handle_http_response::<Vec<Conversation>>(response, "拉取会话列表")
            .await?
            .data
            .unwrap_or_default();
        debug!("[GroupAPI] 会话数: {}", groups.len());
        Ok(groups)
    }

    pub async fn create_group(&self, req: &CreateGroupRequest) -> Result<Conversation> {
        if req.name.trim().is_empty() {
            return Err(ClientError::Validation("群名称不能为空".to_string()).into());
        }
        if req.member_ids.is_empty() {
            return Err(ClientError::Validation("请至少选择一位成员".to_string()).into());
        }
        info!(
            "[GroupAPI] ➕ 创建群组: {}, 成员数: {}",
            req.name,
            req.member_ids.len()
        );
        let response = self
            .session
            .request(Method::POST, "/groups")
            .json(req)
            .send()
            .await
            .context("创建群组请求失败")?;
        handle_http_response::<Conversation>(response, "创建群组")
            .await?
            .into_data("创建群组")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn list_groups_decodes_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "statusCode": 200,
                "message": "ok",
                "data": [{
                    "id": "g1",
                    "name": "Team",
                    "isGroup": true,
                    "participants": [{ "userId": "u1", "role": "OWNER" }],
                    "lastMessage": {
                        "id": "m1",
                        "senderId": "u1",
                        "kind": "IMAGE",
                        "createdAt": "2024-05-01T10:00:00Z"
                    },
                    "unreadCount": 3
                }]
            })))
            .mount(&server)
            .await;

        let api = GroupApi::new(HttpSession::new(reqwest::Client::new(), server.uri()));
        let groups = api.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].has_participant("u1"));
        assert_eq!(
            groups[0].last_message.as_ref().unwrap().preview_text(),
            "[Image]"
        );
        assert_eq!(groups[0].unread_count, 3);
    }

    #[tokio::test]
    async fn create_group_validates_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/groups"))
            .and(body_json(json!({ "name": "Team", "memberIds": ["u2"] })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "success",
                "statusCode": 201,
                "message": "created",
                "data": { "id": "g2", "name": "Team", "isGroup": true }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = GroupApi::new(HttpSession::new(reqwest::Client::new(), server.uri()));
        let err = api
            .create_group(&CreateGroupRequest {
                name: " ".into(),
                member_ids: vec!["u2".into()],
                avatar: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::Validation(_))
        ));

        let group = api
            .create_group(&CreateGroupRequest {
                name: "Team".into(),
                member_ids: vec!["u2".into()],
                avatar: None,
            })
            .await
            .unwrap();
        assert_eq!(group.id, "g2");
    }
}
