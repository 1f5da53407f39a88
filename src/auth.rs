//! Bearer 凭据校验：哈希模式与环境变量模式。

use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AuthConfig;
use crate::error::ApiError;

const BEARER_SCHEME: &str = "bearer";

#[derive(Debug)]
enum AuthMode {
    /// 保存凭据的 SHA-256 十六进制摘要。
    Hashed(String),
    /// 与启动时读取的环境变量比较；变量缺失时拒绝所有请求。
    Env(Option<String>),
    /// `from_env = false`：没有可用的密钥来源。
    Disabled,
}

#[derive(Debug)]
pub struct Authenticator {
    mode: AuthMode,
}

impl Authenticator {
    /// `env_secret` 是 `PELIT_AUTH` 的值，由调用方显式传入。
    pub fn new(config: &AuthConfig, env_secret: Option<String>) -> Self {
        let mode = match (&config.hashed, config.from_env) {
            (Some(digest), _) => AuthMode::Hashed(digest.clone()),
            (None, Some(true)) => {
                if env_secret.is_none() {
                    warn!("auth.from_env is set but the secret variable is missing, all requests will be rejected");
                }
                AuthMode::Env(env_secret.filter(|secret| !secret.is_empty()))
            }
            (None, _) => AuthMode::Disabled,
        };
        Self { mode }
    }

    /// 校验原始 `Authorization` 头的值。
    pub fn verify(&self, header_value: Option<&str>) -> bool {
        let Some(credential) = header_value.and_then(extract_credential) else {
            return false;
        };
        match &self.mode {
            AuthMode::Hashed(digest) => {
                digest_matches(digest, credential)
                    || (credential.bytes().any(|b| b.is_ascii_uppercase())
                        && digest_matches(digest, &credential.to_ascii_lowercase()))
            }
            AuthMode::Env(Some(secret)) => secret.to_lowercase() == credential.to_lowercase(),
            AuthMode::Env(None) | AuthMode::Disabled => false,
        }
    }

    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if self.verify(value) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

/// 去掉可选的 `Bearer` 前缀（不区分大小写，后接空白）。
pub fn extract_credential(value: &str) -> Option<&str> {
    let value = value.trim();
    let credential = match (value.get(..BEARER_SCHEME.len()), value.get(BEARER_SCHEME.len()..)) {
        (Some(scheme), Some(rest))
            if scheme.eq_ignore_ascii_case(BEARER_SCHEME)
                && rest.starts_with(char::is_whitespace) =>
        {
            rest.trim_start()
        }
        _ => value,
    };
    (!credential.is_empty()).then_some(credential)
}

fn digest_matches(expected: &str, credential: &str) -> bool {
    hex::encode(Sha256::digest(credential.as_bytes())).eq_ignore_ascii_case(expected)
}
