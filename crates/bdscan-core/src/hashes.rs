//! 已知恶意文件哈希（整文件 SHA-256）
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::ScanError;
use crate::rules::RULE_SEPARATOR;

/// 整文件内容指纹：SHA-256 小写十六进制
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 已知恶意哈希集合（启动时加载一次，扫描期间只读）
#[derive(Debug, Clone, Default)]
pub struct KnownHashSet {
    hashes: HashSet<String>,
}

impl KnownHashSet {
    /// 解析哈希列表：每行 `hash` 或 `hash;;;description`，`#` 开头为注释；只索引哈希部分
    pub fn parse(text: &str) -> Self {
        let hashes = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| {
                let hash = l.split_once(RULE_SEPARATOR).map_or(l, |(h, _)| h).trim();
                (!hash.is_empty()).then(|| hash.to_ascii_lowercase())
            })
            .collect();
        Self { hashes }
    }

    /// 加载哈希文件；缺失或没有任何条目视为配置错误
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let txt = std::fs::read_to_string(path)
            .map_err(|e| ScanError::config(format!("cannot read known-hash file {}: {e}", path.display())))?;
        let set = Self::parse(&txt);
        if set.is_empty() {
            return Err(ScanError::config(format!("known-hash file {} has no entries", path.display())));
        }
        debug!(count = set.len(), "loaded known hashes");
        Ok(set)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(&hash.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl FromIterator<String> for KnownHashSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self { hashes: iter.into_iter().map(|h| h.to_ascii_lowercase()).collect() }
    }
}
