//! 行扫描：规则匹配、级别判定与载荷解码
use regex::Regex;

use crate::decode::{base64_run_regex, decode_base64_payload, decode_char_codes, normalize_whitespace};
use crate::findings::Detection;
use crate::rules::KindRules;

/// 行扫描器；只持有预编译的辅助正则，可在线程间共享
#[derive(Debug, Clone)]
pub struct LineScanner {
    base64_run: Regex,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LineScanner {
    pub fn new() -> Self {
        Self { base64_run: base64_run_regex() }
    }

    /// 用某一类型的规则扫描一行，每条命中的规则产生一条 Detection（按规则顺序）
    pub fn scan_line(&self, line: &str, line_number: usize, file_path: &str, rules: &KindRules) -> Vec<Detection> {
        let mut out = Vec::new();
        let mut normalized: Option<String> = None;

        for rule in rules.matching(line) {
            let decoded_content = if rule.decodes_char_codes() {
                decode_char_codes(line, &rule.pattern)
            } else if rule.decodes_base64() {
                decode_base64_payload(line, &self.base64_run)
            } else {
                None
            };

            let line_text = normalized.get_or_insert_with(|| normalize_whitespace(line)).clone();
            out.push(Detection {
                file_path: file_path.to_string(),
                severity: rule.severity(),
                label: rule.label.clone(),
                line_number,
                line_text,
                decoded_content,
                content_hash: None,
                new: None,
            });
        }

        out
    }

    /// 逐行扫描整段文本（行号从 1 开始）
    pub fn scan_text(&self, text: &str, file_path: &str, rules: &KindRules) -> Vec<Detection> {
        if rules.is_empty() {
            return Vec::new();
        }
        text.lines()
            .enumerate()
            .flat_map(|(i, line)| self.scan_line(line, i + 1, file_path, rules))
            .collect()
    }
}
