//! 客户端错误分类
//!
//! 内部调用链仍使用 `anyhow::Result` 传播，需要区分类别时通过
//! `downcast_ref::<ClientError>()` 取回。

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// 表单/参数校验失败（就地提示，不发请求）
    #[error("validation error: {0}")]
    Validation(String),

    /// 服务端返回非成功状态
    #[error("api error {status_code}: {message}")]
    Api { status_code: i32, message: String },

    /// 请求未能完成（连接失败、超时等）
    #[error("http error: {0}")]
    Http(String),

    /// 响应或事件无法解析
    #[error("decode error: {0}")]
    Decode(String),

    #[error("realtime channel not connected")]
    NotConnected,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("ack timeout for event {0}")]
    AckTimeout(String),
}

impl ClientError {
    /// 给 UI 横幅使用的简短文案
    pub fn notice_text(&self) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            ClientError::Api { message, .. } if !message.is_empty() => message.clone(),
            ClientError::Api { status_code, .. } => format!("请求失败 ({})", status_code),
            ClientError::Http(_) => "网络异常，请稍后重试".to_string(),
            ClientError::Decode(_) => "服务器响应异常".to_string(),
            ClientError::NotConnected => "实时连接已断开".to_string(),
            ClientError::NotAuthenticated => "登录已失效，请重新登录".to_string(),
            ClientError::AckTimeout(_) => "服务器响应超时".to_string(),
        }
    }

    /// 从任意 anyhow 错误中提取提示文案
    pub fn notice_for(err: &anyhow::Error) -> String {
        if let Some(e) = err.downcast_ref::<ClientError>() {
            return e.notice_text();
        }
        if err.downcast_ref::<reqwest::Error>().is_some() {
            return ClientError::Http(err.to_string()).notice_text();
        }
        err.to_string()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e.to_string())
    }
}
