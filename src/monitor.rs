// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Engine health and memory tracking
//!
//! Heap figures are *allocated* bytes, which only ever grow for the life of
//! an engine. Percentages are therefore taken against a fixed configured
//! limit, not a real utilization ratio.

use serde::{Deserialize, Serialize};

/// Snapshot of what the monitor knows about the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealthState {
    pub initialized: bool,
    pub heap_bytes: u64,
    /// Heap sampled before the current or most recent job
    pub baseline_bytes: Option<u64>,
    pub last_ping_id: Option<String>,
}

/// Answer to a memory usage query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub percent: f64,
    /// Signed: a fresh engine may report less than an old baseline
    pub growth_since_baseline: i64,
}

/// Raised when the heap crosses the warning threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWarning {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    state: EngineHealthState,
    limit_bytes: u64,
    warning_percent: f64,
}

impl HealthMonitor {
    pub fn new(limit_bytes: u64, warning_percent: f64) -> Self {
        Self {
            state: EngineHealthState::default(),
            limit_bytes: limit_bytes.max(1),
            warning_percent,
        }
    }

    pub fn state(&self) -> &EngineHealthState {
        &self.state
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.state.initialized = initialized;
        if !initialized {
            self.state.heap_bytes = 0;
            self.state.baseline_bytes = None;
        }
    }

    fn percent_of_limit(&self, bytes: u64) -> f64 {
        let percent = bytes as f64 / self.limit_bytes as f64 * 100.0;
        (percent * 10.0).round() / 10.0
    }

    /// Record a heap sample
    pub fn sample(&mut self, heap_bytes: u64) {
        self.state.heap_bytes = heap_bytes;
    }

    /// Record the pre-job baseline; warns if the heap is already high
    pub fn begin_job(&mut self, heap_bytes: u64) -> Option<MemoryWarning> {
        self.sample(heap_bytes);
        self.state.baseline_bytes = Some(heap_bytes);
        self.check_threshold()
    }

    /// Record the post-job heap; warns if the job pushed it over the threshold
    pub fn end_job(&mut self, heap_bytes: u64) -> Option<MemoryWarning> {
        let growth = heap_bytes.saturating_sub(self.state.baseline_bytes.unwrap_or(heap_bytes));
        if growth > 0 {
            tracing::debug!("Engine heap grew by {} bytes during job", growth);
        }
        self.sample(heap_bytes);
        self.check_threshold()
    }

    fn check_threshold(&self) -> Option<MemoryWarning> {
        let percent = self.percent_of_limit(self.state.heap_bytes);
        if percent < self.warning_percent {
            return None;
        }
        tracing::warn!(
            "Engine heap at {} bytes ({:.1}% of {} byte limit)",
            self.state.heap_bytes,
            percent,
            self.limit_bytes
        );
        Some(MemoryWarning {
            used_bytes: self.state.heap_bytes,
            limit_bytes: self.limit_bytes,
            percent,
        })
    }

    pub fn usage(&self) -> MemoryUsage {
        let used = self.state.heap_bytes;
        let baseline = self.state.baseline_bytes.unwrap_or(used);
        MemoryUsage {
            used_bytes: used,
            limit_bytes: self.limit_bytes,
            percent: self.percent_of_limit(used),
            growth_since_baseline: used as i64 - baseline as i64,
        }
    }

    /// Remember the ping being answered
    pub fn record_ping(&mut self, id: &str) {
        self.state.last_ping_id = Some(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_warning_threshold() {
        let mut monitor = HealthMonitor::new(100 * MIB, 75.0);
        assert!(monitor.begin_job(50 * MIB).is_none());

        let warning = monitor.end_job(80 * MIB).unwrap();
        assert_eq!(warning.used_bytes, 80 * MIB);
        assert_relative_eq!(warning.percent, 80.0);
    }

    #[test]
    fn test_usage_growth() {
        let mut monitor = HealthMonitor::new(100 * MIB, 75.0);
        monitor.begin_job(10 * MIB);
        monitor.end_job(25 * MIB);

        let usage = monitor.usage();
        assert_eq!(usage.growth_since_baseline, (15 * MIB) as i64);
        assert_relative_eq!(usage.percent, 25.0);
    }

    #[test]
    fn test_reset_on_teardown() {
        let mut monitor = HealthMonitor::new(100 * MIB, 75.0);
        monitor.set_initialized(true);
        monitor.begin_job(90 * MIB);
        monitor.set_initialized(false);
        assert_eq!(monitor.usage().used_bytes, 0);
        assert!(!monitor.state().initialized);
    }
}
