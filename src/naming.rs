//! 随机文件名分配。

use rand::RngCore;
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::config::NAME_BYTES;

/// 生成 20 位十六进制的随机名（来自 CSPRNG）。
pub fn random_name() -> String {
    let mut bytes = [0u8; NAME_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 返回在 `directory` 中与 `name + extension` 不冲突的基础名。
///
/// 检查与随后的写入不是原子的，并发分配存在极小概率冲突。
pub async fn allocate_name(directory: &Path, extension: &str) -> io::Result<String> {
    loop {
        let candidate = random_name();
        let path = directory.join(format!("{candidate}{extension}"));
        if !fs::try_exists(&path).await? {
            return Ok(candidate);
        }
        debug!(path = ?path, "generated name collided, retrying");
    }
}
