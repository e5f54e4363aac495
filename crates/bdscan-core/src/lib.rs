//! Garry's Mod 插件后门扫描核心库
//!
//! 设计要点：
//! - 规则在启动时编译一次（每个文件类型一个 RegexSet 预筛 + 逐条 Regex），扫描期间只读共享。
//! - `.gma` 归档按文件表逐个提取 lua/vmt/vtf/ttf 成员，成员在所属归档的单元内串行扫描。
//! - 已知恶意哈希命中直接产生一条 Critical 结果，跳过逐行匹配。
//! - 结果经通道汇入单一所有者的汇总器，计数与命中列表始终一致。

mod aggregate;
pub mod archive;
mod config;
mod decode;
mod error;
mod findings;
mod hashes;
mod options;
mod report;
mod rules;
mod scan;
mod scanner;
mod types;

pub use aggregate::{ResultAggregator, UnitOutcome};
pub use archive::{ArchiveEntry, ArchiveHeader, ArchiveIndex};
pub use config::ConfigFile;
pub use decode::{decode_base64_payload, decode_char_codes, normalize_whitespace};
pub use error::{ArchiveError, ScanError};
pub use findings::{sort_detections_stable, Detection, DetectionKey};
pub use hashes::{content_hash, KnownHashSet};
pub use options::{ScanOptions, DEFAULT_KNOWN_HASHES, DEFAULT_REPORT_PATH, DEFAULT_RULES_DIR};
pub use report::{BaselineIndex, ScanReport, Statistics};
pub use rules::{parse_definitions, rule_file_path, KindRules, Rule, RuleSet};
pub use scan::{
    collect_work_units, display_path, ensure_root, run_scan, scan_archive, scan_directory, scan_plain_file,
    ScanContext, WorkUnit, KNOWN_BACKDOOR_LABEL,
};
pub use scanner::LineScanner;
pub use types::{FileKind, Severity};
