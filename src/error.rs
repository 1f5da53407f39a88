//! 统一的错误类型：API 响应、配置校验与存储访问。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// 请求处理失败的分类。
///
/// 存储侧失败（配额、IO）统一返回 502，表示“服务端失败”。
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    BadRequest(String),
    NotFound,
    QuotaExceeded,
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::QuotaExceeded | ApiError::Internal(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// 返回给客户端的消息，不包含内部细节。
    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized => "authentication failed",
            ApiError::Forbidden => "forbidden",
            ApiError::BadRequest(msg) => msg,
            ApiError::NotFound => "not found",
            ApiError::QuotaExceeded => "storage quota exceeded",
            ApiError::Internal(_) => "internal error",
        }
    }

    fn log_internal(&self) {
        if let ApiError::Internal(detail) = self {
            error!(detail = %detail, "internal error");
        }
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    success: bool,
    message: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        let body = FailureBody {
            success: false,
            message: self.message(),
        };
        (self.status(), JsonResponse(body)).into_response()
    }
}

/// 以纯文本返回的错误，用于文件读取接口。
#[derive(Debug)]
pub struct PlainError(pub ApiError);

impl IntoResponse for PlainError {
    fn into_response(self) -> Response {
        self.0.log_internal();
        (self.0.status(), self.0.message().to_string()).into_response()
    }
}

impl From<ApiError> for PlainError {
    fn from(error: ApiError) -> Self {
        PlainError(error)
    }
}

impl From<StorageError> for PlainError {
    fn from(error: StorageError) -> Self {
        PlainError(error.into())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::Forbidden,
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::NotADirectory => ApiError::NotFound,
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

/// 配置文件读取或校验失败。字段以点分路径命名，例如 `storage.path`。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: cannot read configuration: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field `{0}`")]
    Missing(String),
    #[error("unknown field `{0}`")]
    Unknown(String),
    #[error("field `{field}` must be {expected}")]
    Type {
        field: String,
        expected: &'static str,
    },
    #[error("field `{field}` is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Missing(field) | ConfigError::Unknown(field) => Some(field),
            ConfigError::Type { field, .. } | ConfigError::Invalid { field, .. } => Some(field),
            ConfigError::Read { .. } | ConfigError::Parse(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn storage_failures_map_to_service_errors() {
        let not_found = StorageError::Io(io::Error::from(ErrorKind::NotFound));
        assert!(matches!(ApiError::from(not_found), ApiError::NotFound));

        let denied = StorageError::Io(io::Error::from(ErrorKind::PermissionDenied));
        let mapped = ApiError::from(denied);
        assert_eq!(mapped.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(mapped.message(), "internal error");
    }

    #[tokio::test]
    async fn json_body_hides_internal_detail() {
        let response = ApiError::Internal("disk on fire at /srv/data".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "internal error");
    }

    #[tokio::test]
    async fn plain_error_renders_text() {
        let response = PlainError(ApiError::Forbidden).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(&bytes[..], b"forbidden");
    }

    #[test]
    fn config_error_names_field() {
        let err = ConfigError::Missing("storage.path".into());
        assert_eq!(err.field(), Some("storage.path"));
        assert_eq!(err.to_string(), "missing required field `storage.path`");
    }
}
