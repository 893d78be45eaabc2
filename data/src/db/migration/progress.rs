//! Per-table progress reporting
//!
//! Emits a log line every `interval` processed rows, with an ETA derived from
//! the throughput so far.

use std::time::{Duration, Instant};

pub struct ProgressTracker {
    label: String,
    total_rows: usize,
    processed_rows: usize,
    interval: usize,
    next_report: usize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, total_rows: usize, interval: usize) -> Self {
        let interval = interval.max(1);
        Self {
            label: label.into(),
            total_rows,
            processed_rows: 0,
            interval,
            next_report: interval,
            start_time: Instant::now(),
        }
    }

    /// Count one processed row; returns the progress line when one is due
    pub fn tick(&mut self) -> Option<String> {
        self.advance(1)
    }

    pub fn advance(&mut self, rows: usize) -> Option<String> {
        self.processed_rows += rows;
        if self.processed_rows < self.next_report {
            return None;
        }
        while self.next_report <= self.processed_rows {
            self.next_report += self.interval;
        }

        let line = self.render();
        log::info!("{}", line);
        Some(line)
    }

    pub fn processed(&self) -> usize {
        self.processed_rows
    }

    fn render(&self) -> String {
        let elapsed = self.start_time.elapsed();
        let percent = if self.total_rows == 0 {
            100.0
        } else {
            (self.processed_rows as f64 / self.total_rows as f64) * 100.0
        };

        let remaining = self.total_rows.saturating_sub(self.processed_rows);
        let eta = if remaining == 0 {
            format_duration(Duration::ZERO)
        } else if elapsed.as_secs_f64() > 0.0 {
            let rate = self.processed_rows as f64 / elapsed.as_secs_f64();
            format_duration(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            "calculating...".to_string()
        };

        format!(
            "{}: {}/{} rows ({:.1}%) - Elapsed: {} - ETA: {}",
            self.label,
            self.processed_rows,
            self.total_rows,
            percent,
            format_duration(elapsed),
            eta
        )
    }

    pub fn finish(&self) {
        log::info!(
            "{}: processed {} rows in {}",
            self.label,
            self.processed_rows,
            format_duration(self.start_time.elapsed())
        );
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
