//! 简单 HTML 报告（单表格，无模板）
use bdscan_core::{ScanReport, Severity};
use chrono::DateTime;
use std::fmt::Write;

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_time(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos).format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn severity_color(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "#c0392b",
        Severity::High => "#e67e22",
        Severity::Medium => "#f1c40f",
        Severity::Low => "#7f8c8d",
    }
}

/// 渲染报告；`diff` 为真时只列出新增命中
pub fn render(report: &ScanReport, diff: bool) -> String {
    let s = &report.statistics;
    let mut html = String::new();
    // 写入 String 不会失败
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>bdscan report</title>\
         <style>body{{font-family:sans-serif}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 8px;text-align:left}}code{{white-space:pre-wrap}}</style>\
         </head><body>\n<h1>bdscan report</h1>\n\
         <p>Started {} &middot; finished {} &middot; {} files processed &middot; {} detections</p>\n\
         <p>Critical: {} &middot; High: {} &middot; Medium: {} &middot; Low: {}</p>\n",
        format_time(report.start_time),
        format_time(report.end_time),
        report.files_processed,
        report.detections_found,
        s.critical,
        s.high,
        s.medium,
        s.low,
    );
    if diff {
        let _ = writeln!(html, "<p>Showing {} new detections since the previous run.</p>", report.new_detections());
    }

    html.push_str("<table>\n<tr><th>Severity</th><th>File</th><th>Line</th><th>Detection</th><th>Text</th><th>Decoded / Hash</th></tr>\n");
    for d in report.surfaced() {
        let extra = d.decoded_content.as_deref().or(d.content_hash.as_deref()).unwrap_or("");
        let _ = writeln!(
            html,
            "<tr><td style=\"color:{}\">{}</td><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td><td><code>{}</code></td></tr>",
            severity_color(d.severity),
            d.severity,
            escape(&d.file_path),
            d.line_number,
            escape(&d.label),
            escape(&d.line_text),
            escape(extra),
        );
    }
    html.push_str("</table>\n</body></html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdscan_core::Detection;

    #[test]
    fn escapes_markup_in_fields() {
        assert_eq!(escape("<script>\"x\" & 'y'"), "&lt;script&gt;&quot;x&quot; &amp; &#39;y&#39;");
    }

    #[test]
    fn diff_mode_lists_only_new_rows() {
        let mk = |line: usize, new: bool| Detection {
            file_path: "a.lua".into(),
            severity: Severity::High,
            label: "http.Fetch [HIGH]".into(),
            line_number: line,
            line_text: "http.Fetch(<url>)".into(),
            decoded_content: None,
            content_hash: None,
            new: Some(new),
        };
        let report = ScanReport { detections: vec![mk(1, false), mk(2, true)], ..Default::default() };
        let html = render(&report, true);
        assert_eq!(html.matches("<tr><td").count(), 1);
        assert!(html.contains("http.Fetch(&lt;url&gt;)"));
        assert!(html.contains("1970-01-01 00:00:00 UTC"));
    }
}
