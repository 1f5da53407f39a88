//! 存储用量统计与配额分级。

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::fs;

use crate::config::StorageConfig;

pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaTier {
    Ok,
    Warn,
    Block,
}

/// 阈值单位为 MiB，`0` 表示不启用。
pub fn classify(usage_mib: f64, warn_mib: f64, max_mib: f64) -> QuotaTier {
    if max_mib > 0.0 && usage_mib > max_mib {
        QuotaTier::Block
    } else if warn_mib > 0.0 && usage_mib > warn_mib {
        QuotaTier::Warn
    } else {
        QuotaTier::Ok
    }
}

#[derive(Debug, Clone)]
pub struct QuotaMonitor {
    root: PathBuf,
    warn_mib: f64,
    max_mib: f64,
}

impl QuotaMonitor {
    pub fn new(root: PathBuf, warn_mib: f64, max_mib: f64) -> Self {
        Self {
            root,
            warn_mib,
            max_mib,
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.path.clone(), storage.warn, storage.max)
    }

    /// 每次调用都完整遍历一次存储目录，不做缓存。
    pub async fn check(&self) -> io::Result<(QuotaTier, f64)> {
        let usage = self.usage_bytes().await? as f64 / BYTES_PER_MIB;
        Ok((classify(usage, self.warn_mib, self.max_mib), usage))
    }

    /// 递归累加普通文件大小；目录和符号链接不计入。
    pub async fn usage_bytes(&self) -> io::Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    match entry.metadata().await {
                        Ok(metadata) => total += metadata.len(),
                        // removed by a concurrent delete
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Ok(total)
    }
}
