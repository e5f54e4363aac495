//! 错误分类
use std::path::PathBuf;
use thiserror::Error;

/// 扫描过程中对外暴露的错误
///
/// - `Config` / `Filesystem`：启动期致命错误，任何扫描开始前即中止
/// - `Io` / `Archive`：仅影响单个文件或归档，调用方记录日志后跳过
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid scan root {path}: {reason}")]
    Filesystem { path: PathBuf, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("report error: {0}")]
    Report(String),

    #[error("worker pool error: {0}")]
    Pool(String),
}

/// GMA 归档解析错误（只影响当前归档）
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("bad magic {found:?}, expected \"GMAD\"")]
    BadMagic { found: [u8; 4] },

    #[error("unexpected end of data while reading {field}")]
    Truncated { field: &'static str },

    #[error("entry {filename:?} has negative size {size}")]
    NegativeSize { filename: String, size: i64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 解码失败（内部使用，最终退化为“无解码内容”）
#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("match {0:?} carries no numeric token")]
    NoDigits(String),

    #[error("numeric token {0:?} out of range")]
    Overflow(String),

    #[error("no decodable characters")]
    Empty,

    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not printable text")]
    NotText,
}

impl ScanError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ScanError::Config(msg.into())
    }
}
