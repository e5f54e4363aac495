use anyhow::{bail, Context, Result};
use bdscan_core::{run_scan, ArchiveIndex, ConfigFile, ScanOptions, ScanReport, Severity};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

mod html;

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "bdscan", version, about = "Garry's Mod 插件后门扫描器")]
struct Cli {
    /// 扫描目录（递归，包含 .gma 归档）
    #[arg(short = 'd', long = "dir", required_unless_present = "inspect")]
    dir: Option<PathBuf>,

    /// 最低上报级别
    #[arg(short = 's', long = "severity", value_parser = ["low", "medium", "high", "critical"])]
    severity: Option<String>,

    /// 不在控制台逐条打印命中
    #[arg(short = 'q', long)]
    quiet: bool,

    /// 额外生成 HTML 报告（与 JSON 报告同名，扩展名 .html）
    #[arg(long)]
    html: bool,

    /// 与上次的 JSON 报告对比，只打印新增命中
    #[arg(long)]
    diff: bool,

    /// JSON 报告路径（默认 ./bdscan_report.json）
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// 规则目录（lua.rules / vmt.rules / vtf.rules / ttf.rules），默认 ./rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// 已知恶意哈希文件，默认 ./rules/known_hashes.txt
    #[arg(long)]
    hashes: Option<PathBuf>,

    /// 线程数（"auto"=CPU 核心数）
    #[arg(long)]
    threads: Option<String>,

    /// 最大扫描文件大小（单位字节，例如 5242880 代表 5MB）
    #[arg(long)]
    max_file_size: Option<u64>,

    /// TOML 配置文件；命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 只打印指定 .gma 归档的头部与文件表，不扫描
    #[arg(long, value_name = "GMA")]
    inspect: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）
    init_tracing(cli.quiet);

    if let Some(path) = &cli.inspect {
        return inspect_archive(path);
    }

    let opts = build_options(&cli)?;
    let dir = match &cli.dir {
        Some(d) => d.clone(),
        None => bail!("--dir is required"),
    };
    info!(?dir, output = ?opts.report_path, min_severity = %opts.min_severity, "starting scan");

    // 对比模式下基线在扫描开始前读取，随后才覆盖报告文件
    let report = run_scan(&dir, &opts).context("scan failed")?;
    report
        .save(&opts.report_path)
        .with_context(|| format!("write report {}", opts.report_path.display()))?;

    if cli.html {
        let html_path = opts.report_path.with_extension("html");
        let mut out = BufWriter::new(File::create(&html_path).with_context(|| format!("create {}", html_path.display()))?);
        out.write_all(html::render(&report, opts.diff).as_bytes())?;
        out.flush()?;
        info!(path = ?html_path, "html report written");
    }

    if !cli.quiet {
        print_detections(&report)?;
    }
    print_summary(&report, opts.diff);
    Ok(())
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // 支持通过环境变量 RUST_LOG 控制日志等级，如：RUST_LOG=debug；quiet 时默认只显示告警
    let default_level = if quiet { "warn" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// 默认值 → 配置文件 → 命令行参数，依次覆盖
fn build_options(cli: &Cli) -> Result<ScanOptions> {
    let mut opts = ScanOptions::default();
    if let Some(path) = &cli.config {
        ConfigFile::load(path)?.apply(&mut opts);
    }
    if let Some(s) = &cli.severity {
        opts.min_severity = s.parse::<Severity>().map_err(anyhow::Error::msg)?;
    }
    if let Some(o) = &cli.output {
        opts.report_path = o.clone();
    }
    if let Some(r) = &cli.rules {
        opts.rules_dir = r.clone();
    }
    if let Some(h) = &cli.hashes {
        opts.known_hashes = h.clone();
    }
    if let Some(t) = &cli.threads {
        opts.threads = parse_threads(t);
    }
    if cli.max_file_size.is_some() {
        opts.max_file_size = cli.max_file_size;
    }
    if cli.diff {
        opts.diff = true;
    }
    Ok(opts)
}

/// 解析线程参数
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") {
        return None;
    }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}

/// 控制台输出：`路径 | 标签 @ Line #n | 行内容`；对比模式下只打印新增
fn print_detections(report: &ScanReport) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for d in report.surfaced() {
        writeln!(out, "{} | {} @ Line #{} | {}", d.file_path, d.label, d.line_number, d.line_text)?;
        if let Some(decoded) = &d.decoded_content {
            writeln!(out, "    Decoded: {decoded}")?;
        }
        if let Some(hash) = &d.content_hash {
            writeln!(out, "    SHA-256: {hash}")?;
        }
    }
    Ok(())
}

fn print_summary(report: &ScanReport, diff: bool) {
    let s = &report.statistics;
    info!(
        files_processed = report.files_processed,
        detections = report.detections_found,
        critical = s.critical,
        high = s.high,
        medium = s.medium,
        low = s.low,
        known_bad = report.known_bad_files,
        "scan complete"
    );
    if diff {
        info!(new = report.new_detections(), "compared with previous report");
    }
}

fn inspect_archive(path: &Path) -> Result<()> {
    let index = ArchiveIndex::open(path).with_context(|| format!("read archive {}", path.display()))?;
    let h = &index.header;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Name:         {}", h.name)?;
    writeln!(out, "Author:       {}", h.author)?;
    writeln!(out, "Description:  {}", h.description)?;
    writeln!(out, "Format:       v{}", h.format_version)?;
    writeln!(out, "Version:      {}", h.content_version)?;
    writeln!(out, "Owner:        {}", h.owner_id)?;
    writeln!(out, "Created:      {}", h.created_at)?;
    if !h.required_dependencies.is_empty() {
        writeln!(out, "Requires:     {}", h.required_dependencies.join(", "))?;
    }
    writeln!(out, "Content at:   {:#x}", index.content_start)?;
    writeln!(out)?;
    writeln!(out, "{:>12}  {:>12}  {:>8}  {}", "offset", "size", "crc32", "file")?;
    for e in &index.entries {
        let mark = if bdscan_core::archive::is_scannable_member(&e.filename) { "*" } else { " " };
        writeln!(out, "{:>12}  {:>12}  {:08x}  {}{}", e.relative_offset, e.byte_size, e.crc32, mark, e.filename)?;
    }
    Ok(())
}
