//! 扫描选项与统计信息（模块）
use std::path::PathBuf;

use crate::types::Severity;

/// 默认规则目录
pub const DEFAULT_RULES_DIR: &str = "rules";
/// 默认已知哈希文件
pub const DEFAULT_KNOWN_HASHES: &str = "rules/known_hashes.txt";
/// 默认报告输出路径
pub const DEFAULT_REPORT_PATH: &str = "bdscan_report.json";

/// 扫描选项
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 最低上报级别（低于此级别的命中不计数、不输出）
    pub min_severity: Severity,
    /// 最大文件大小（字节）；超过则跳过
    pub max_file_size: Option<u64>,
    /// 规则目录（包含 lua.rules / vmt.rules / vtf.rules / ttf.rules）
    pub rules_dir: PathBuf,
    /// 已知恶意哈希文件
    pub known_hashes: PathBuf,
    /// 线程数：None 表示自动（等于 CPU 核数）；Some(1) 即单线程池
    pub threads: Option<usize>,
    /// 与上次报告对比，标记新增命中
    pub diff: bool,
    /// JSON 报告路径；对比模式下也是基线来源
    pub report_path: PathBuf,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            min_severity: Severity::Low,
            max_file_size: None,
            rules_dir: PathBuf::from(DEFAULT_RULES_DIR),
            known_hashes: PathBuf::from(DEFAULT_KNOWN_HASHES),
            threads: None,
            diff: false,
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
        }
    }
}

impl ScanOptions {
    /// 实际使用的线程数
    pub fn effective_threads(&self) -> usize {
        self.threads.filter(|n| *n >= 1).unwrap_or_else(num_cpus::get)
    }
}
