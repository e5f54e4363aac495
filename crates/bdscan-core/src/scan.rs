//! 扫描主流程与并行调度
//!
//! 每个可扫描文件或每个归档是一个独立的工作单元：
//! - 工作单元在 Rayon 线程池（线程数有上限）中并行执行
//! - 每个单元完成后把结果经有界通道交给持有汇总器的线程
//! - 单元内的错误只记录日志并跳过该单元，不影响其他单元
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::aggregate::{ResultAggregator, UnitOutcome};
use crate::archive::{self, ArchiveIndex, ARCHIVE_EXTENSION};
use crate::error::ScanError;
use crate::findings::Detection;
use crate::hashes::{content_hash, KnownHashSet};
use crate::options::ScanOptions;
use crate::report::{BaselineIndex, ScanReport};
use crate::rules::RuleSet;
use crate::scanner::LineScanner;
use crate::types::{FileKind, Severity};

/// 已知恶意哈希命中时使用的标签
pub const KNOWN_BACKDOOR_LABEL: &str = "Known Backdoor (hash match) [CRITICAL]";

/// 通道容量：worker → 汇总线程
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// 扫描期间只读共享的上下文
#[derive(Debug)]
pub struct ScanContext {
    pub rules: RuleSet,
    pub known_hashes: KnownHashSet,
    pub scanner: LineScanner,
}

impl ScanContext {
    pub fn new(rules: RuleSet, known_hashes: KnownHashSet) -> Self {
        Self { rules, known_hashes, scanner: LineScanner::new() }
    }
}

/// 待调度的工作单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    Plain { path: PathBuf, kind: FileKind },
    Archive { path: PathBuf },
}

impl WorkUnit {
    pub fn path(&self) -> &Path {
        match self {
            WorkUnit::Plain { path, .. } | WorkUnit::Archive { path } => path,
        }
    }

    /// 按扩展名（小写）分类；既不是可扫描类型也不是归档则返回 None
    pub fn classify(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == ARCHIVE_EXTENSION {
            return Some(WorkUnit::Archive { path: path.to_path_buf() });
        }
        FileKind::from_extension(&ext).map(|kind| WorkUnit::Plain { path: path.to_path_buf(), kind })
    }
}

/// 报告中的路径统一使用 `/`
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// 一站式入口：按选项加载规则、哈希与基线，然后扫描目录
pub fn run_scan(root: &Path, opts: &ScanOptions) -> Result<ScanReport, ScanError> {
    ensure_root(root)?;
    let rules = RuleSet::load_dir(&opts.rules_dir)?;
    let known_hashes = KnownHashSet::load(&opts.known_hashes)?;
    let baseline = if opts.diff { Some(BaselineIndex::load(&opts.report_path)?) } else { None };
    info!(rules = rules.total_rules(), known_hashes = known_hashes.len(), diff = opts.diff, "configuration loaded");

    let ctx = ScanContext::new(rules, known_hashes);
    let aggregator = ResultAggregator::new(opts.min_severity, baseline);
    scan_directory(root, &ctx, opts, aggregator)
}

/// 扫描根目录必须存在且为目录
pub fn ensure_root(root: &Path) -> Result<(), ScanError> {
    match std::fs::metadata(root) {
        Ok(md) if md.is_dir() => Ok(()),
        Ok(_) => Err(ScanError::Filesystem { path: root.to_path_buf(), reason: "not a directory".into() }),
        Err(e) => Err(ScanError::Filesystem { path: root.to_path_buf(), reason: e.to_string() }),
    }
}

/// 递归收集工作单元，按路径排序以保证调度顺序可复现
pub fn collect_work_units(root: &Path) -> Vec<WorkUnit> {
    let mut units: Vec<WorkUnit> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(unit) = WorkUnit::classify(entry.path()) {
            units.push(unit);
        }
    }
    units.sort_by(|a, b| a.path().cmp(b.path()));
    units
}

/// 扫描目录并返回最终报告
/// - 扫描在独立线程内创建 Rayon 线程池并执行
/// - 当前线程持有汇总器，逐个吸收工作单元结果
/// - 全部单元结束（通道关闭且线程 join）后才 finalize
pub fn scan_directory(
    root: &Path,
    ctx: &ScanContext,
    opts: &ScanOptions,
    mut aggregator: ResultAggregator,
) -> Result<ScanReport, ScanError> {
    use crossbeam_channel as channel;
    use rayon::prelude::*;

    ensure_root(root)?;
    let units = collect_work_units(root);
    let threads = opts.effective_threads();
    info!(root = %root.display(), units = units.len(), threads, "starting scan");

    let (tx, rx) = channel::bounded::<UnitOutcome>(OUTCOME_CHANNEL_CAPACITY);

    std::thread::scope(|s| {
        let scan_thread = s.spawn(move || -> Result<(), ScanError> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| ScanError::Pool(e.to_string()))?;
            pool.install(|| {
                units.par_iter().for_each_with(tx, |tx, unit| {
                    let outcome = run_unit(ctx, opts, unit);
                    let _ = tx.send(outcome);
                });
            });
            // 结束后 Sender 全部被丢弃，Receiver 将收到关闭信号
            Ok(())
        });

        while let Ok(outcome) = rx.recv() {
            aggregator.absorb(outcome);
        }

        match scan_thread.join() {
            Ok(res) => res,
            Err(_) => Err(ScanError::Pool("scan thread panicked".into())),
        }
    })?;

    let report = aggregator.finalize();
    info!(
        files_processed = report.files_processed,
        detections = report.detections_found,
        known_bad = report.known_bad_files,
        "scan finished"
    );
    Ok(report)
}

/// 执行单个工作单元；错误在此处消化为日志
fn run_unit(ctx: &ScanContext, opts: &ScanOptions, unit: &WorkUnit) -> UnitOutcome {
    let res = match unit {
        WorkUnit::Plain { path, kind } => scan_plain_file(ctx, opts, path, *kind),
        WorkUnit::Archive { path } => scan_archive(ctx, opts, path),
    };
    match res {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path = %unit.path().display(), error = %e, "skipping");
            UnitOutcome::default()
        }
    }
}

fn too_large(opts: &ScanOptions, size: u64) -> bool {
    opts.max_file_size.is_some_and(|max| size > max)
}

/// 普通文件：整读 → 哈希短路 → 逐行扫描；空文件跳过且不计数
pub fn scan_plain_file(ctx: &ScanContext, opts: &ScanOptions, path: &Path, kind: FileKind) -> Result<UnitOutcome, ScanError> {
    let io_err = |source| ScanError::Io { path: path.to_path_buf(), source };
    if opts.max_file_size.is_some() {
        let md = std::fs::metadata(path).map_err(io_err)?;
        if too_large(opts, md.len()) {
            debug!(path = %path.display(), size = md.len(), "over size limit, skipped");
            return Ok(UnitOutcome::default());
        }
    }
    let bytes = std::fs::read(path).map_err(io_err)?;
    if bytes.is_empty() {
        debug!(path = %path.display(), "empty file, skipped");
        return Ok(UnitOutcome::default());
    }
    Ok(scan_content(ctx, &display_path(path), kind, &bytes))
}

/// 归档：解析文件表，依次提取可扫描成员并扫描（成员在本单元内串行处理）
pub fn scan_archive(ctx: &ScanContext, opts: &ScanOptions, path: &Path) -> Result<UnitOutcome, ScanError> {
    let index = ArchiveIndex::open(path).map_err(|source| ScanError::Archive { path: path.to_path_buf(), source })?;
    let archive_display = display_path(path);
    debug!(archive = %archive_display, name = %index.header.name, entries = index.entries.len(), "archive opened");

    let mut outcome = UnitOutcome::default();
    for entry in index.scannable_entries() {
        let kind = match entry.kind() {
            Some(k) => k,
            None => continue,
        };
        if too_large(opts, u64::try_from(entry.byte_size).unwrap_or(0)) {
            debug!(archive = %archive_display, member = %entry.filename, "member over size limit, skipped");
            continue;
        }
        let bytes = match archive::extract(path, entry, index.content_start) {
            Ok(b) => b,
            Err(e) => {
                error!(archive = %archive_display, member = %entry.filename, error = %e, "member extraction failed");
                continue;
            }
        };
        if bytes.is_empty() {
            continue;
        }
        let virtual_path = format!("{archive_display}/{}", entry.filename);
        let member = scan_content(ctx, &virtual_path, kind, &bytes);
        outcome.files_processed += member.files_processed;
        outcome.known_bad += member.known_bad;
        outcome.detections.extend(member.detections);
    }
    Ok(outcome)
}

/// 单份内容的扫描：已知哈希命中时只产生一条 Critical 命中，跳过逐行扫描
fn scan_content(ctx: &ScanContext, file_path: &str, kind: FileKind, bytes: &[u8]) -> UnitOutcome {
    let hash = content_hash(bytes);
    if ctx.known_hashes.contains(&hash) {
        info!(file = %file_path, hash = %hash, "known backdoor hash");
        return UnitOutcome {
            detections: vec![known_backdoor_detection(file_path, hash)],
            files_processed: 1,
            known_bad: 1,
        };
    }

    let text = String::from_utf8_lossy(bytes);
    let detections = ctx.scanner.scan_text(&text, file_path, ctx.rules.rules_for(kind));
    UnitOutcome { detections, files_processed: 1, known_bad: 0 }
}

fn known_backdoor_detection(file_path: &str, hash: String) -> Detection {
    Detection {
        file_path: file_path.to_string(),
        severity: Severity::Critical,
        label: KNOWN_BACKDOOR_LABEL.to_string(),
        line_number: 0,
        line_text: String::new(),
        decoded_content: None,
        content_hash: Some(hash),
        new: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parse_definitions;
    use std::fs;

    fn context(known: &[&[u8]]) -> ScanContext {
        let mut rules = parse_definitions(FileKind::Lua, "RunString;;;Code Execution (RunString) [CRITICAL]\n");
        rules.extend(parse_definitions(FileKind::Vmt, "[0-9]{2,3},;;;CharCode [HIGH]\n"));
        let hashes = known.iter().map(|b| content_hash(b)).collect();
        ScanContext::new(RuleSet::from_rules(rules).unwrap(), hashes)
    }

    #[test]
    fn classify_by_lowercased_extension() {
        assert!(matches!(WorkUnit::classify(Path::new("a/B.LUA")), Some(WorkUnit::Plain { kind: FileKind::Lua, .. })));
        assert!(matches!(WorkUnit::classify(Path::new("x.GMA")), Some(WorkUnit::Archive { .. })));
        assert_eq!(WorkUnit::classify(Path::new("notes.txt")), None);
        assert_eq!(WorkUnit::classify(Path::new("Makefile")), None);
    }

    #[test]
    fn collect_skips_unknown_extensions_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lua/autorun")).unwrap();
        fs::write(dir.path().join("lua/autorun/a.lua"), "x").unwrap();
        fs::write(dir.path().join("readme.txt"), "RunString").unwrap();
        fs::write(dir.path().join("pack.gma"), "GMAD").unwrap();
        let units = collect_work_units(dir.path());
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.path().extension().unwrap() != "txt"));
    }

    #[test]
    fn known_hash_short_circuits_line_scan() {
        let content: &[u8] = b"RunString(a)\nRunString(b)\n";
        let ctx = context(&[content]);
        let out = scan_content(&ctx, "x.lua", FileKind::Lua, content);
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.known_bad, 1);
        let d = &out.detections[0];
        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(d.line_number, 0);
        assert_eq!(d.content_hash.as_deref(), Some(content_hash(content).as_str()));
    }

    #[test]
    fn unknown_hash_scans_lines() {
        let ctx = context(&[]);
        let out = scan_content(&ctx, "x.lua", FileKind::Lua, b"RunString(a)\nprint(1)\nRunString(b)\n");
        let lines: Vec<_> = out.detections.iter().map(|d| d.line_number).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(out.known_bad, 0);
    }

    #[test]
    fn empty_plain_file_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.lua");
        fs::write(&path, "").unwrap();
        let out = scan_plain_file(&context(&[]), &ScanOptions::default(), &path, FileKind::Lua).unwrap();
        assert_eq!(out.files_processed, 0);
        assert!(out.detections.is_empty());
    }

    #[test]
    fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.lua");
        fs::write(&path, "RunString(x)\n".repeat(10)).unwrap();
        let opts = ScanOptions { max_file_size: Some(16), ..ScanOptions::default() };
        let out = scan_plain_file(&context(&[]), &opts, &path, FileKind::Lua).unwrap();
        assert_eq!(out.files_processed, 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = scan_plain_file(&context(&[]), &ScanOptions::default(), Path::new("/nonexistent/a.lua"), FileKind::Lua)
            .unwrap_err();
        assert!(matches!(err, ScanError::Io { .. }));
    }

    #[test]
    fn root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.lua");
        fs::write(&file, "x").unwrap();
        assert!(matches!(ensure_root(&file), Err(ScanError::Filesystem { .. })));
        assert!(matches!(ensure_root(&dir.path().join("nope")), Err(ScanError::Filesystem { .. })));
        assert!(ensure_root(dir.path()).is_ok());
    }

    #[test]
    fn display_path_uses_forward_slashes() {
        assert_eq!(display_path(Path::new("addons\\x\\a.lua")), "addons/x/a.lua");
    }
}
