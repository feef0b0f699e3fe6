//! Phase timing log (`LABEL_START: YYYYMMDDHHMMSS` / `LABEL_END: ...`).
//!
//! Every phase also records the CPU time and peak resident memory of this
//! process and its worker processes.

use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use forcing_common::time::PROFILE_TIME_FORMAT;
use tracing::{debug, info};

use crate::usage::ResourceUsage;

/// One finished phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub label: String,
    pub elapsed_secs: f64,
    pub usage: ResourceUsage,
}

#[derive(Debug, Default)]
pub struct Profiler {
    verbose: bool,
    lines: Vec<String>,
    open: Vec<(String, Instant, ResourceUsage)>,
    phases: Vec<PhaseRecord>,
}

impl Profiler {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn start(&mut self, label: &str) {
        self.start_at(label, Utc::now().naive_utc(), ResourceUsage::with_children());
    }

    /// Close `label`; returns its duration in seconds.
    pub fn end(&mut self, label: &str) -> f64 {
        self.end_at(label, Utc::now().naive_utc(), ResourceUsage::with_children())
    }

    fn start_at(&mut self, label: &str, at: NaiveDateTime, usage: ResourceUsage) {
        self.lines
            .push(format!("{}_START: {}", label, at.format(PROFILE_TIME_FORMAT)));
        self.open.push((label.to_string(), Instant::now(), usage));
    }

    fn end_at(&mut self, label: &str, at: NaiveDateTime, usage: ResourceUsage) -> f64 {
        self.lines
            .push(format!("{}_END: {}", label, at.format(PROFILE_TIME_FORMAT)));
        let (elapsed, used) = match self.open.iter().rposition(|(l, _, _)| l == label) {
            Some(i) => {
                let (_, started, before) = self.open.remove(i);
                (started.elapsed().as_secs_f64(), usage.since(&before))
            }
            None => (0.0, usage),
        };

        if self.verbose {
            info!(
                phase = label,
                elapsed_secs = format!("{:.1}", elapsed),
                cpu_secs = format!("{:.1}", used.cpu_secs()),
                peak_rss_mb = format!("{:.1}", used.peak_rss_mb()),
                "Phase finished"
            );
        } else {
            debug!(phase = label, elapsed_secs = elapsed, "Phase finished");
        }
        self.phases.push(PhaseRecord {
            label: label.to_string(),
            elapsed_secs: elapsed,
            usage: used,
        });
        elapsed
    }

    /// Completed phases in completion order.
    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    /// One record per label in first-completion order. Repeated phases (one
    /// `PROCESSING` per chunk) sum their times and keep the largest peak.
    pub fn totals(&self) -> Vec<PhaseRecord> {
        let mut totals: Vec<PhaseRecord> = Vec::new();
        for phase in &self.phases {
            match totals.iter_mut().find(|t| t.label == phase.label) {
                Some(total) => {
                    total.elapsed_secs += phase.elapsed_secs;
                    total.usage.user_secs += phase.usage.user_secs;
                    total.usage.system_secs += phase.usage.system_secs;
                    total.usage.peak_rss_kb = total.usage.peak_rss_kb.max(phase.usage.peak_rss_kb);
                }
                None => totals.push(phase.clone()),
            }
        }
        totals
    }

    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(7, 8, s)
            .unwrap()
    }

    fn usage(cpu: f64, peak: u64) -> ResourceUsage {
        ResourceUsage {
            user_secs: cpu,
            system_secs: 0.0,
            peak_rss_kb: peak,
        }
    }

    #[test]
    fn test_render_lines() {
        let mut profiler = Profiler::new(false);
        profiler.start_at("WEIGHTS", at(1), usage(0.0, 10));
        profiler.end_at("WEIGHTS", at(9), usage(2.0, 40));

        assert_eq!(
            profiler.render(),
            "WEIGHTS_START: 20240305070801\nWEIGHTS_END: 20240305070809\n"
        );
        assert_eq!(profiler.phases().len(), 1);
        assert_eq!(profiler.phases()[0].label, "WEIGHTS");
        assert_eq!(profiler.phases()[0].usage, usage(2.0, 40));
    }

    #[test]
    fn test_repeated_phases_fold_into_one_total() {
        let mut profiler = Profiler::new(true);
        profiler.start_at("WEIGHTS", at(0), usage(0.0, 10));
        profiler.end_at("WEIGHTS", at(1), usage(1.0, 10));
        for (cpu, peak) in [(3.0, 50), (6.0, 80), (7.0, 60)] {
            profiler.start_at("PROCESSING", at(2), usage(cpu - 1.0, 0));
            profiler.end_at("PROCESSING", at(3), usage(cpu, peak));
        }

        let totals = profiler.totals();
        let labels: Vec<&str> = totals.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["WEIGHTS", "PROCESSING"]);
        assert_eq!(totals[1].usage.cpu_secs(), 3.0);
        assert_eq!(totals[1].usage.peak_rss_kb, 80);
        assert_eq!(profiler.phases().len(), 4);
    }
}
