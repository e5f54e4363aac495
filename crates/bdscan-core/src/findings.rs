//! 命中项与排序
use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// 单次命中（某条规则命中某一行，或整文件哈希命中）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "file")]
    pub file_path: String,
    pub severity: Severity,
    #[serde(rename = "detection")]
    pub label: String,
    /// 哈希命中时为 0
    pub line_number: usize,
    pub line_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_content: Option<String>,
    #[serde(rename = "hash", default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// 仅在启用基线对比时由汇总器填写
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<bool>,
}

/// 基线对比所用的复合键
pub type DetectionKey = (String, usize, String);

impl Detection {
    pub fn key(&self) -> DetectionKey {
        (self.file_path.clone(), self.line_number, self.label.clone())
    }

    /// 只有启用对比且判定为新增时才返回 false
    pub fn is_previously_seen(&self) -> bool {
        self.new == Some(false)
    }
}

/// 按 (文件路径, 行号, 标签) 排序；并发扫描的到达顺序不稳定，比较前先排序
pub fn sort_detections_stable(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.line_number.cmp(&b.line_number))
            .then_with(|| a.label.cmp(&b.label))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(path: &str, line: usize, label: &str) -> Detection {
        Detection {
            file_path: path.into(),
            severity: Severity::Low,
            label: label.into(),
            line_number: line,
            line_text: String::new(),
            decoded_content: None,
            content_hash: None,
            new: None,
        }
    }

    #[test]
    fn json_field_names() {
        let mut d = det("a.lua", 3, "Code Execution (RunString)");
        d.decoded_content = Some("HELLO".into());
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["file"], "a.lua");
        assert_eq!(v["severity"], "low");
        assert_eq!(v["detection"], "Code Execution (RunString)");
        assert_eq!(v["line_number"], 3);
        assert_eq!(v["decoded_content"], "HELLO");
        assert!(v.get("hash").is_none());
        assert!(v.get("new").is_none());
    }

    #[test]
    fn sort_orders_by_path_then_line() {
        let mut v = vec![det("b.lua", 1, "x"), det("a.lua", 9, "x"), det("a.lua", 2, "y"), det("a.lua", 2, "a")];
        sort_detections_stable(&mut v);
        let keys: Vec<_> = v.iter().map(|d| (d.file_path.as_str(), d.line_number, d.label.as_str())).collect();
        assert_eq!(keys, vec![("a.lua", 2, "a"), ("a.lua", 2, "y"), ("a.lua", 9, "x"), ("b.lua", 1, "x")]);
    }
}
