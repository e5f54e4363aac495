//! 公共类型（对外暴露）
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 可扫描的文件类型（按扩展名区分，各自拥有独立的规则集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Lua,
    Vmt,
    Vtf,
    Ttf,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [FileKind::Lua, FileKind::Vmt, FileKind::Vtf, FileKind::Ttf];

    /// 由扩展名（不含点，大小写不敏感）解析文件类型；未知扩展名返回 None
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "lua" => Some(FileKind::Lua),
            "vmt" => Some(FileKind::Vmt),
            "vtf" => Some(FileKind::Vtf),
            "ttf" => Some(FileKind::Ttf),
            _ => None,
        }
    }

    /// 由文件名解析（取最后一个点之后的部分）
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Lua => "lua",
            FileKind::Vmt => "vmt",
            FileKind::Vtf => "vtf",
            FileKind::Ttf => "ttf",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// 严重级别：Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 从规则标签中的方括号标记推断级别（`[CRITICAL]` / `[HIGH]` / `[MEDIUM]`），缺省为 Low
    pub fn from_label(label: &str) -> Self {
        if label.contains("[CRITICAL]") {
            Severity::Critical
        } else if label.contains("[HIGH]") {
            Severity::High
        } else if label.contains("[MEDIUM]") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// 是否达到阈值（单调：阈值越高，放行越少）
    pub fn meets(self, threshold: Severity) -> bool {
        self >= threshold
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity {other:?} (expected low|medium|high|critical)")),
        }
    }
}
