//! 报告模型、JSON 持久化与基线索引
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::ScanError;
use crate::findings::{Detection, DetectionKey};
use crate::types::Severity;

/// 各级别计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl Statistics {
    pub fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// 一次扫描的最终报告（finalize 之后只读）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unix 纪元纳秒
    pub start_time: i64,
    pub end_time: i64,
    pub files_processed: usize,
    pub detections_found: usize,
    #[serde(default)]
    pub known_bad_files: usize,
    pub statistics: Statistics,
    pub detections: Vec<Detection>,
}

impl ScanReport {
    /// 从上次运行的 JSON 报告加载
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let file = File::open(path).map_err(|source| ScanError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ScanError::Report(format!("cannot parse {}: {e}", path.display())))
    }

    /// 以缩进 JSON 写出
    pub fn write_json(&self, out: &mut dyn Write) -> Result<(), ScanError> {
        serde_json::to_writer_pretty(&mut *out, self).map_err(|e| ScanError::Report(e.to_string()))?;
        writeln!(out).map_err(|e| ScanError::Report(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        let file = File::create(path).map_err(|source| ScanError::Io { path: path.to_path_buf(), source })?;
        let mut out = BufWriter::new(file);
        self.write_json(&mut out)?;
        out.flush().map_err(|source| ScanError::Io { path: path.to_path_buf(), source })
    }

    /// 面向用户输出的命中：对比模式下只保留新增项
    pub fn surfaced(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|d| !d.is_previously_seen())
    }

    pub fn new_detections(&self) -> usize {
        self.detections.iter().filter(|d| d.new == Some(true)).count()
    }
}

/// 上次运行的命中键集合（加载后只读）
#[derive(Debug, Clone, Default)]
pub struct BaselineIndex {
    keys: HashSet<DetectionKey>,
}

impl BaselineIndex {
    pub fn from_report(report: &ScanReport) -> Self {
        report.detections.iter().map(Detection::key).collect()
    }

    /// 读取上次的报告文件；文件不存在时返回空基线（首次运行）
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no previous report, every detection counts as new");
            return Ok(Self::default());
        }
        ScanReport::load(path).map(|r| Self::from_report(&r))
    }

    pub fn contains(&self, key: &DetectionKey) -> bool {
        self.keys.contains(key)
    }

    pub fn is_new(&self, detection: &Detection) -> bool {
        !self.contains(&detection.key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<DetectionKey> for BaselineIndex {
    fn from_iter<I: IntoIterator<Item = DetectionKey>>(iter: I) -> Self {
        Self { keys: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(path: &str, line: usize, label: &str, severity: Severity) -> Detection {
        Detection {
            file_path: path.into(),
            severity,
            label: label.into(),
            line_number: line,
            line_text: "RunString(x)".into(),
            decoded_content: None,
            content_hash: None,
            new: None,
        }
    }

    #[test]
    fn baseline_classifies_identical_key_as_seen() {
        let baseline: BaselineIndex =
            std::iter::once(("a.lua".to_string(), 3, "Code Execution (RunString)".to_string())).collect();
        assert!(!baseline.is_new(&det("a.lua", 3, "Code Execution (RunString)", Severity::Low)));
        assert!(baseline.is_new(&det("a.lua", 4, "Code Execution (RunString)", Severity::Low)));
        assert!(baseline.is_new(&det("b.lua", 3, "Code Execution (RunString)", Severity::Low)));
        assert!(baseline.is_new(&det("a.lua", 3, "Code Execution (CompileString)", Severity::Low)));
    }

    #[test]
    fn report_json_shape_and_reload() {
        let mut stats = Statistics::default();
        stats.bump(Severity::Critical);
        let report = ScanReport {
            start_time: 1,
            end_time: 2,
            files_processed: 1,
            detections_found: 1,
            known_bad_files: 0,
            statistics: stats,
            detections: vec![det("a.lua", 3, "RunString [CRITICAL]", Severity::Critical)],
        };
        let mut buf = Vec::new();
        report.write_json(&mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["statistics"]["critical"], 1);
        assert_eq!(v["detections"][0]["severity"], "critical");
        assert_eq!(v["detections_found"], 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        report.save(&path).unwrap();
        let baseline = BaselineIndex::load(&path).unwrap();
        assert_eq!(baseline.len(), 1);
        assert!(baseline.contains(&("a.lua".into(), 3, "RunString [CRITICAL]".into())));
    }

    #[test]
    fn loads_report_without_optional_fields() {
        let txt = r#"{"start_time":0,"end_time":0,"files_processed":0,"detections_found":0,
            "statistics":{"critical":0,"high":0,"medium":0,"low":0},
            "detections":[{"file":"x.vmt","severity":"high","detection":"CharCode","line_number":2,"line_text":"72,"}]}"#;
        let report: ScanReport = serde_json::from_str(txt).unwrap();
        assert_eq!(report.known_bad_files, 0);
        assert_eq!(report.detections[0].severity, Severity::High);
        assert_eq!(report.detections[0].new, None);
    }

    #[test]
    fn missing_baseline_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let b = BaselineIndex::load(&dir.path().join("absent.json")).unwrap();
        assert!(b.is_empty());
    }

    #[test]
    fn surfaced_hides_previously_seen() {
        let mut seen = det("a.lua", 1, "x", Severity::Low);
        seen.new = Some(false);
        let mut fresh = det("a.lua", 2, "x", Severity::Low);
        fresh.new = Some(true);
        let report = ScanReport { detections: vec![seen, fresh], ..Default::default() };
        assert_eq!(report.surfaced().count(), 1);
        assert_eq!(report.new_detections(), 1);
    }
}
