use crate::im::error::ClientError;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// 各 API 客户端共享的 HTTP 会话
///
/// `client` 在外部配置好默认请求头（X-Device-Id）；访问令牌登录后才有，
/// 每次请求时按需附加 `Authorization: Bearer`。
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    api_base_url: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpSession {
    pub fn new(client: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.access_token.write() {
            *slot = token;
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    /// 构造请求，已登录时附带访问令牌
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// 统一的 API 响应包装结构体（status、statusCode、message、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// statusCode 缺失（0）时只看 HTTP 状态
    pub fn is_success(&self) -> bool {
        self.status_code == 0 || (200..300).contains(&self.status_code)
    }

    /// 取出 data，缺失时报错
    pub fn into_data(self, operation_name: &str) -> anyhow::Result<T> {
        self.data.ok_or_else(|| {
            anyhow::Error::new(ClientError::Decode(format!(
                "{}响应中缺少 data 字段",
                operation_name
            )))
        })
    }
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
/// 所有 API 都可以共用此方法
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;

    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        // 错误响应通常也带信封，尽量取出服务端的 message
        let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&body_bytes)
            .map(|r| r.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body_str.to_string());
        return Err(ClientError::Api {
            status_code: i32::from(status.as_u16()),
            message,
        }
        .into());
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        ClientError::Decode(format!("{}: {}", operation_name, e))
    })?;

    if !api_resp.is_success() {
        error!(
            "[HTTP] {}服务器错误，状态码: {}, 错误信息: {}",
            operation_name, api_resp.status_code, api_resp.message
        );
        return Err(ClientError::Api {
            status_code: api_resp.status_code,
            message: api_resp.message,
        }
        .into());
    }

    info!("[HTTP] ✅ {}成功，HTTP状态: {}", operation_name, status);
    Ok(api_resp)
}
