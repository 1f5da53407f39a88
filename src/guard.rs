//! 路径片段安全检查与防盗链校验。

use regex::Regex;
use tracing::warn;

use crate::config::NetworkConfig;
use crate::error::ApiError;

/// 片段包含 `..`、`/` 或 `\` 时视为危险。
///
/// 只接受单个片段（目录名或文件名），不接受拼接后的路径。
pub fn is_unsafe_segment(segment: &str) -> bool {
    segment.contains("..") || segment.contains('/') || segment.contains('\\')
}

pub fn ensure_safe_segment(segment: &str) -> Result<(), ApiError> {
    if is_unsafe_segment(segment) {
        warn!(segment, "rejected unsafe path segment");
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// 以 `.` 开头的条目不对外可见。
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[derive(Debug)]
struct WhitelistEntry {
    literal: String,
    pattern: Option<Regex>,
}

/// Referer 白名单。Referer 由客户端提供，可以伪造，仅用于阻止普通盗链。
#[derive(Debug)]
pub struct HotlinkGuard {
    enabled: bool,
    whitelist: Vec<WhitelistEntry>,
}

impl HotlinkGuard {
    /// 白名单条目既按字面量比较，也按整串匹配的正则比较。
    pub fn new(enabled: bool, whitelist: &[String]) -> Self {
        let whitelist = whitelist
            .iter()
            .map(|entry| {
                let pattern = match Regex::new(&format!("^(?:{entry})$")) {
                    Ok(pattern) => Some(pattern),
                    Err(err) => {
                        warn!(entry, error = %err, "whitelist entry is not a regex, matching literally");
                        None
                    }
                };
                WhitelistEntry {
                    literal: entry.clone(),
                    pattern,
                }
            })
            .collect();
        Self { enabled, whitelist }
    }

    pub fn from_config(network: &NetworkConfig) -> Self {
        Self::new(network.hotlink_block, &network.hotlink_whitelist)
    }

    pub fn allows(&self, referer: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(referer) = referer else {
            return false;
        };
        self.whitelist.iter().any(|entry| {
            entry.literal == referer
                || entry
                    .pattern
                    .as_ref()
                    .is_some_and(|pattern| pattern.is_match(referer))
        })
    }
}
