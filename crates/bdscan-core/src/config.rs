//! 可选的 TOML 配置文件
//!
//! ```toml
//! rules_dir = "rules"
//! known_hashes = "rules/known_hashes.txt"
//! min_severity = "medium"
//! threads = 8
//! max_file_size = 5242880
//! report = "bdscan_report.json"
//! diff = true
//! ```
//! 所有字段可省略；命令行参数优先于文件中的值。
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::options::ScanOptions;
use crate::types::Severity;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub rules_dir: Option<PathBuf>,
    #[serde(default)]
    pub known_hashes: Option<PathBuf>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub diff: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let txt = std::fs::read_to_string(path)
            .map_err(|e| ScanError::config(format!("cannot read config {}: {e}", path.display())))?;
        Self::parse(&txt).map_err(|e| ScanError::config(format!("{}: {e}", path.display())))
    }

    pub fn parse(txt: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(txt)
    }

    /// 把文件中出现的字段覆盖到选项上
    pub fn apply(&self, opts: &mut ScanOptions) {
        if let Some(d) = &self.rules_dir {
            opts.rules_dir = d.clone();
        }
        if let Some(h) = &self.known_hashes {
            opts.known_hashes = h.clone();
        }
        if let Some(s) = self.min_severity {
            opts.min_severity = s;
        }
        if self.threads.is_some() {
            opts.threads = self.threads;
        }
        if self.max_file_size.is_some() {
            opts.max_file_size = self.max_file_size;
        }
        if let Some(r) = &self.report {
            opts.report_path = r.clone();
        }
        if let Some(d) = self.diff {
            opts.diff = d;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_applies_fields() {
        let cfg = ConfigFile::parse("rules_dir = \"/etc/bdscan\"\nmin_severity = \"high\"\nthreads = 3\ndiff = true\n").unwrap();
        let mut opts = ScanOptions::default();
        cfg.apply(&mut opts);
        assert_eq!(opts.rules_dir, PathBuf::from("/etc/bdscan"));
        assert_eq!(opts.min_severity, Severity::High);
        assert_eq!(opts.threads, Some(3));
        assert!(opts.diff);
        // 未出现的字段保持默认
        assert_eq!(opts.known_hashes, ScanOptions::default().known_hashes);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(ConfigFile::parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn unknown_key_and_bad_severity_are_errors() {
        assert!(ConfigFile::parse("colour = \"red\"\n").is_err());
        assert!(ConfigFile::parse("min_severity = \"severe\"\n").is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ConfigFile::load(Path::new("/nonexistent/bdscan.toml")).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
