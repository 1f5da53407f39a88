//! 目录归档任务：在后台线程中把目录打包为 tar.zst。
//!
//! 任务与发起请求完全分离：没有返回通道，也没有状态查询，
//! 结果只记录在服务端日志里。

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::ARCHIVE_ZSTD_LEVEL;
use crate::guard::is_hidden;

#[derive(Debug, Clone)]
pub struct BackupJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// 遍历时跳过的子树（例如归档目录本身）。
    pub exclude: Vec<PathBuf>,
}

impl BackupJob {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            source,
            destination,
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, path: PathBuf) -> Self {
        if path != self.source {
            self.exclude.push(path);
        }
        self
    }

    /// 阻塞执行归档，返回写入的文件数。
    ///
    /// 先写入同目录的隐藏文件，完成后再重命名，未完成的归档不会被下载到。
    pub fn run(&self) -> io::Result<u64> {
        let partial = partial_path(&self.destination);
        match self.write_archive(&partial) {
            Ok(count) => {
                fs::rename(&partial, &self.destination)?;
                Ok(count)
            }
            Err(err) => {
                let _ = fs::remove_file(&partial);
                Err(err)
            }
        }
    }

    fn write_archive(&self, path: &Path) -> io::Result<u64> {
        let file = File::create(path)?;
        let encoder = zstd::stream::write::Encoder::new(file, ARCHIVE_ZSTD_LEVEL)?;
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let count = self.append_tree(&mut builder)?;

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;
        Ok(count)
    }

    fn append_tree<W: Write>(&self, builder: &mut tar::Builder<W>) -> io::Result<u64> {
        let mut count = 0;
        let mut pending = vec![self.source.clone()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if is_hidden(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let path = entry.path();
                if path == self.destination || self.exclude.contains(&path) {
                    continue;
                }
                let relative = path
                    .strip_prefix(&self.source)
                    .map_err(|err| io::Error::other(err.to_string()))?
                    .to_path_buf();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    builder.append_dir(&relative, &path)?;
                    pending.push(path);
                } else if file_type.is_file() {
                    builder.append_path_with_name(&path, &relative)?;
                    count += 1;
                }
            }
        }

        Ok(count)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".into());
    destination.with_file_name(format!(".{name}.partial"))
}

/// 后台归档调度器：用信号量限制同时运行的任务数，多余的任务排队等待。
#[derive(Debug)]
pub struct BackupRunner {
    permits: Arc<Semaphore>,
}

impl BackupRunner {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 派发任务后立即返回，不提供等待或取消句柄。
    pub fn dispatch(&self, job: BackupJob) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(source = ?job.source, "backup runner closed, job dropped");
                return;
            };
            let source = job.source.clone();
            let destination = job.destination.clone();
            info!(source = ?source, destination = ?destination, "backup started");

            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(Ok(files)) => {
                    info!(source = ?source, destination = ?destination, files, "backup finished");
                }
                Ok(Err(err)) => {
                    error!(source = ?source, destination = ?destination, error = %err, "backup failed");
                }
                Err(err) => {
                    error!(source = ?source, error = %err, "backup task panicked");
                }
            }
        });
    }
}
