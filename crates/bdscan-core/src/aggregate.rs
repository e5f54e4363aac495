//! 结果汇总（单写者）
//!
//! 汇总器只有一个所有者：扫描线程把每个工作单元的结果通过通道发过来，
//! 由持有汇总器的线程逐个吸收。计数与命中列表在同一次 `&mut self` 调用中更新，
//! 两者不会出现不一致。
use chrono::Utc;
use tracing::trace;

use crate::findings::Detection;
use crate::report::{BaselineIndex, ScanReport, Statistics};
use crate::types::Severity;

/// 单个工作单元（一个文件或一个归档）的扫描结果
#[derive(Debug, Default)]
pub struct UnitOutcome {
    /// 按行号升序
    pub detections: Vec<Detection>,
    pub files_processed: usize,
    pub known_bad: usize,
}

#[derive(Debug)]
pub struct ResultAggregator {
    min_severity: Severity,
    baseline: Option<BaselineIndex>,
    start_time: i64,
    statistics: Statistics,
    detections: Vec<Detection>,
    files_processed: usize,
    known_bad: usize,
}

pub(crate) fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl ResultAggregator {
    /// `baseline` 为 Some 时启用对比：每条放行的命中都会带上 `new` 标记
    pub fn new(min_severity: Severity, baseline: Option<BaselineIndex>) -> Self {
        Self {
            min_severity,
            baseline,
            start_time: now_nanos(),
            statistics: Statistics::default(),
            detections: Vec::new(),
            files_processed: 0,
            known_bad: 0,
        }
    }

    /// 记录一条命中；低于阈值时丢弃并返回 false
    pub fn record(&mut self, mut detection: Detection) -> bool {
        if !detection.severity.meets(self.min_severity) {
            trace!(file = %detection.file_path, label = %detection.label, "below severity threshold");
            return false;
        }
        if let Some(baseline) = &self.baseline {
            detection.new = Some(baseline.is_new(&detection));
        }
        self.statistics.bump(detection.severity);
        self.detections.push(detection);
        true
    }

    pub fn record_files_processed(&mut self, n: usize) {
        self.files_processed += n;
    }

    pub fn record_known_bad(&mut self, n: usize) {
        self.known_bad += n;
    }

    /// 吸收一个工作单元的结果（保持单元内的顺序）
    pub fn absorb(&mut self, outcome: UnitOutcome) {
        self.record_files_processed(outcome.files_processed);
        self.record_known_bad(outcome.known_bad);
        for d in outcome.detections {
            self.record(d);
        }
    }

    pub fn admitted(&self) -> usize {
        self.detections.len()
    }

    /// 生成最终报告；消耗汇总器，之后不会再变化
    pub fn finalize(self) -> ScanReport {
        debug_assert_eq!(self.statistics.total(), self.detections.len());
        ScanReport {
            start_time: self.start_time,
            end_time: now_nanos(),
            files_processed: self.files_processed,
            detections_found: self.detections.len(),
            known_bad_files: self.known_bad,
            statistics: self.statistics,
            detections: self.detections,
        }
    }
}
