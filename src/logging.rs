//! 日志初始化：`-v` 级别、可选日志文件，`RUST_LOG` 优先。

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 0 = info，1 = warn，2 = error。
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "warn",
        _ => "error",
    }
}

/// 初始化 tracing；指定日志文件时以追加模式写入且不带颜色，否则写到 stderr。
pub fn init_logging(verbosity: u8, log_path: Option<&Path>) -> io::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let log_file = log_path
        .map(|path| OpenOptions::new().create(true).append(true).open(path))
        .transpose()?;

    let stderr_layer = log_file
        .is_none()
        .then(|| fmt::layer().with_writer(io::stderr));
    let file_layer = log_file.map(|file| fmt::layer().with_writer(Arc::new(file)).with_ansi(false));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
