//! 规则文件加载（`<regex>;;;<label>` 文本格式）与编译
use regex::{Regex, RegexSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::types::{FileKind, Severity};

/// 规则行中 pattern 与 label 的分隔符
pub const RULE_SEPARATOR: &str = ";;;";

/// 单条已编译规则（加载后不可变）
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub label: String,
    pub kind: FileKind,
}

impl Rule {
    pub fn new(kind: FileKind, pattern: &str, label: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)?, label: label.into(), kind })
    }

    /// 级别由标签中的方括号标记决定
    pub fn severity(&self) -> Severity {
        Severity::from_label(&self.label)
    }

    /// 标签表明需要做字符码（CharCode / Obfuscation）解码
    pub fn decodes_char_codes(&self) -> bool {
        self.label.contains("CharCode") || self.label.contains("Obfuscation")
    }

    /// 标签表明需要尝试 base64 载荷解码
    pub fn decodes_base64(&self) -> bool {
        self.label.to_ascii_lowercase().contains("base64")
    }
}

/// 归一化后的规则规格（编译前）
#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleSpec {
    pat: String,
    label: String,
}

/// 单个文件类型的规则集合
/// - `rules`：按文件中的顺序保存
/// - `set`：同一批 pattern 组成的 RegexSet，用一次扫描筛出命中的规则下标
#[derive(Debug, Clone)]
pub struct KindRules {
    rules: Vec<Rule>,
    set: RegexSet,
}

impl KindRules {
    fn build(rules: Vec<Rule>) -> Result<Self, ScanError> {
        let set = RegexSet::new(rules.iter().map(|r| r.pattern.as_str()))
            .map_err(|e| ScanError::config(format!("failed to build regex set: {e}")))?;
        Ok(Self { rules, set })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 返回在 `line` 中任意位置命中的规则（保持规则顺序）
    pub fn matching<'a>(&'a self, line: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        let hits = self.set.matches(line);
        hits.into_iter().map(move |idx| &self.rules[idx])
    }
}

/// 全部文件类型的规则（启动时构建一次，扫描期间只读共享）
#[derive(Debug, Clone)]
pub struct RuleSet {
    kinds: Vec<KindRules>,
}

impl RuleSet {
    /// 由已编译规则直接构建；允许某些类型为空（测试与嵌入场景）
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, ScanError> {
        let mut buckets: Vec<Vec<Rule>> = FileKind::ALL.iter().map(|_| Vec::new()).collect();
        for r in rules {
            buckets[r.kind.index()].push(r);
        }
        let kinds = buckets.into_iter().map(KindRules::build).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kinds })
    }

    /// 从目录加载 `<dir>/<kind>.rules`
    ///
    /// 所有类型都会尝试加载以便一次性报告全部问题；
    /// 只要有任一类型最终为 0 条规则，整体加载失败。
    pub fn load_dir(dir: &Path) -> Result<Self, ScanError> {
        let mut all = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for kind in FileKind::ALL {
            let path = rule_file_path(dir, kind);
            match load_kind(&path, kind) {
                Ok(rules) => {
                    debug!(kind = %kind, count = rules.len(), "loaded rules");
                    all.extend(rules);
                }
                Err(e) => {
                    warn!(kind = %kind, path = %path.display(), error = %e, "rule file rejected");
                    failed.push(format!("{kind}: {e}"));
                }
            }
        }

        if !failed.is_empty() {
            return Err(ScanError::config(format!("no usable rules for [{}]", failed.join("; "))));
        }
        Self::from_rules(all)
    }

    pub fn rules_for(&self, kind: FileKind) -> &KindRules {
        &self.kinds[kind.index()]
    }

    pub fn total_rules(&self) -> usize {
        self.kinds.iter().map(KindRules::len).sum()
    }
}

/// 规则文件路径：`<dir>/lua.rules` 等
pub fn rule_file_path(dir: &Path, kind: FileKind) -> std::path::PathBuf {
    dir.join(format!("{}.rules", kind.extension()))
}

/// 加载单个类型的规则文件；缺失/为空/无有效规则都视为配置错误
fn load_kind(path: &Path, kind: FileKind) -> Result<Vec<Rule>, ScanError> {
    let txt = std::fs::read_to_string(path)
        .map_err(|e| ScanError::config(format!("cannot read {}: {e}", path.display())))?;
    if txt.trim().is_empty() {
        return Err(ScanError::config(format!("{} is empty", path.display())));
    }
    let rules = parse_definitions(kind, &txt);
    if rules.is_empty() {
        return Err(ScanError::config(format!("{} contains no valid rules", path.display())));
    }
    Ok(rules)
}

/// 解析规则文本并编译
/// - 空行与 `#` 注释行忽略
/// - 缺少 `;;;` 分隔符、pattern/label 为空的行跳过并告警
/// - 正则编译失败的规则丢弃并告警，不影响其余规则
pub fn parse_definitions(kind: FileKind, text: &str) -> Vec<Rule> {
    let mut out = Vec::new();
    for (lineno, spec) in parse_specs(text) {
        match Rule::new(kind, &spec.pat, spec.label) {
            Ok(rule) => out.push(rule),
            Err(e) => warn!(kind = %kind, line = lineno, pattern = %spec.pat, error = %e, "dropping rule with invalid regex"),
        }
    }
    out
}

fn parse_specs(text: &str) -> Vec<(usize, RuleSpec)> {
    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let lineno = i + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let (pat, label) = match line.split_once(RULE_SEPARATOR) {
            Some(parts) => parts,
            None => {
                warn!(line = lineno, "rule line has no ';;;' separator, skipped");
                continue;
            }
        };
        // pattern 保留原样（空格可能有意义），label 去除两端空白
        let label = label.trim();
        if pat.is_empty() || label.is_empty() {
            warn!(line = lineno, "rule line has empty pattern or label, skipped");
            continue;
        }
        out.push((lineno, RuleSpec { pat: pat.to_string(), label: label.to_string() }));
    }
    out
}
