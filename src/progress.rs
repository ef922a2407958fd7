use std::time::{Duration, Instant};

/// Throughput and ETA for the current run. Never persisted.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    consulted: usize,
    /// Rows from the start offset to the end of the table.
    pending_total: usize,
}

/// Progress figures after one consulted row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub consulted: usize,
    pub pending_total: usize,
    pub average: Duration,
    pub eta: Duration,
}

impl ProgressTracker {
    pub fn start(pending_total: usize) -> Self {
        Self::start_at(Instant::now(), pending_total)
    }

    pub fn start_at(started: Instant, pending_total: usize) -> Self {
        Self {
            started,
            consulted: 0,
            pending_total,
        }
    }

    pub fn consulted(&self) -> usize {
        self.consulted
    }

    /// Counts one consulted row and estimates the remaining time.
    ///
    /// `rows_left` is the number of rows after the current one. Every row left
    /// is assumed to need a fetch, so the ETA is an upper bound when the
    /// cache is warm.
    pub fn record_consulted(&mut self, rows_left: usize) -> ProgressReport {
        self.record_consulted_at(Instant::now(), rows_left)
    }

    pub fn record_consulted_at(&mut self, now: Instant, rows_left: usize) -> ProgressReport {
        self.consulted += 1;
        let elapsed = now.saturating_duration_since(self.started);
        let average = elapsed / self.consulted as u32;
        let eta = average.saturating_mul(rows_left.min(u32::MAX as usize) as u32);

        ProgressReport {
            consulted: self.consulted,
            pending_total: self.pending_total,
            average,
            eta,
        }
    }
}

/// Compact duration for progress lines: `45s`, `12min`, `1h 5min`.
pub fn format_eta(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}min", secs / 60)
    } else {
        format!("{}h {}min", secs / 3600, (secs % 3600) / 60)
    }
}
