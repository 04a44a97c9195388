// Copyright (c) The difftester Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thread-safe accumulation of per-case outcomes into a run summary.
//!
//! Every slot is pre-allocated in submission order, so the summary's case
//! list is stable across runs no matter which worker finishes first. All
//! mutation goes through one mutex; `record` is idempotent per case (first
//! write wins), so an outcome can never be overwritten.

use crate::{diff::DiffReport, process::StageResult};
use std::{
    fmt,
    sync::Mutex,
    time::Duration,
};

/// Case-level verdict. These three are the only case-level outcomes; a
/// run-level fatal failure is reported separately and contains no cases.
#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// Both pipelines completed and the outputs are line-for-line identical.
    Pass,

    /// Both pipelines completed but the outputs differ.
    Fail,

    /// A pipeline stage did not complete: missing tool, crash, or timeout.
    Error,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.pad("PASS"),
            Verdict::Fail => f.pad("FAIL"),
            Verdict::Error => f.pad("ERROR"),
        }
    }
}

/// The complete result of one executed test case.
#[derive(Clone, Debug)]
pub struct CaseOutcome {
    /// The case's display name (`library/testfileN`).
    pub name: String,
    pub verdict: Verdict,

    /// Results of the external invocations made for this case, in order.
    pub stages: Vec<StageResult>,

    /// Line-exact mismatch report; present on FAIL.
    pub diff: Option<DiffReport>,

    /// Diagnostic for ERROR outcomes.
    pub message: Option<String>,

    pub time_taken: Duration,
}

/// What happened to each submitted case.
#[derive(Clone, Debug)]
pub enum CaseState {
    /// Not yet finished (only visible in snapshots).
    Pending,

    /// Filtered out; never executed.
    Skipped,

    /// The run was cancelled before this case started.
    Cancelled,

    Done(CaseOutcome),
}

/// Aggregated counters for a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// Cases that were expected to run when the run started. If the run is
    /// cancelled this exceeds `final_run_count`.
    pub initial_run_count: usize,

    /// Cases that actually produced an outcome.
    pub final_run_count: usize,

    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success: nothing failed or
    /// errored, and no case was cancelled before running.
    pub fn is_success(&self) -> bool {
        if self.initial_run_count > self.final_run_count {
            return false;
        }
        self.failed == 0 && self.errored == 0
    }
}

/// The finished (or snapshotted) view of a run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub stats: RunStats,

    /// One entry per submitted case, in submission order.
    pub cases: Vec<(String, CaseState)>,

    /// Wall-clock duration of the run so far.
    pub duration: Duration,

    /// Set when the subject compiler failed to build; no cases were
    /// attempted.
    pub fatal: Option<String>,
}

impl RunSummary {
    /// A run that died before any case could be attempted.
    pub fn fatal(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            stats: RunStats::default(),
            cases: Vec::new(),
            duration,
            fatal: Some(message.into()),
        }
    }
}

struct AggregatorInner {
    slots: Vec<(String, CaseState)>,
    stats: RunStats,
}

/// Collects case outcomes from concurrent workers.
pub struct RunAggregator {
    inner: Mutex<AggregatorInner>,
}

impl RunAggregator {
    /// Creates an aggregator with one pre-allocated slot per case, in
    /// submission order.
    pub fn new(case_names: Vec<String>, initial_run_count: usize) -> Self {
        let slots = case_names
            .into_iter()
            .map(|name| (name, CaseState::Pending))
            .collect();
        Self {
            inner: Mutex::new(AggregatorInner {
                slots,
                stats: RunStats {
                    initial_run_count,
                    ..RunStats::default()
                },
            }),
        }
    }

    /// Records the outcome for the case at `index`.
    ///
    /// Returns false (and changes nothing) if the slot was already written:
    /// a CaseOutcome is produced exactly once per case per run.
    pub fn record(&self, index: usize, outcome: CaseOutcome) -> bool {
        let mut inner = self.inner.lock().expect("aggregator lock poisoned");
        if !matches!(inner.slots[index].1, CaseState::Pending) {
            return false;
        }
        inner.stats.final_run_count += 1;
        match outcome.verdict {
            Verdict::Pass => inner.stats.passed += 1,
            Verdict::Fail => inner.stats.failed += 1,
            Verdict::Error => inner.stats.errored += 1,
        }
        inner.slots[index].1 = CaseState::Done(outcome);
        true
    }

    /// Marks the case at `index` as filtered out.
    pub fn record_skipped(&self, index: usize) -> bool {
        self.transition(index, CaseState::Skipped, |stats| stats.skipped += 1)
    }

    /// Marks the case at `index` as cancelled before it started.
    pub fn record_cancelled(&self, index: usize) -> bool {
        self.transition(index, CaseState::Cancelled, |stats| stats.cancelled += 1)
    }

    fn transition(
        &self,
        index: usize,
        state: CaseState,
        bump: impl FnOnce(&mut RunStats),
    ) -> bool {
        let mut inner = self.inner.lock().expect("aggregator lock poisoned");
        if !matches!(inner.slots[index].1, CaseState::Pending) {
            return false;
        }
        bump(&mut inner.stats);
        inner.slots[index].1 = state;
        true
    }

    /// Current counters; cheap to call concurrently with ongoing records.
    pub fn stats(&self) -> RunStats {
        self.inner.lock().expect("aggregator lock poisoned").stats
    }

    /// A consistent view of the run so far; safe to call while workers are
    /// still recording.
    pub fn snapshot(&self, duration: Duration) -> RunSummary {
        let inner = self.inner.lock().expect("aggregator lock poisoned");
        RunSummary {
            stats: inner.stats,
            cases: inner.slots.clone(),
            duration,
            fatal: None,
        }
    }

    /// The final summary. Called once every worker has finished, at which
    /// point no slot is still pending: each case was recorded, skipped, or
    /// cancelled.
    pub fn finalize(&self, duration: Duration) -> RunSummary {
        self.snapshot(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(name: &str, verdict: Verdict) -> CaseOutcome {
        CaseOutcome {
            name: name.to_owned(),
            verdict,
            stages: Vec::new(),
            diff: None,
            message: None,
            time_taken: Duration::ZERO,
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|&name| name.to_owned()).collect()
    }

    #[test]
    fn record_is_idempotent_per_case() {
        let aggregator = RunAggregator::new(names(&["A/testfile1"]), 1);
        assert!(aggregator.record(0, outcome("A/testfile1", Verdict::Pass)));
        assert!(
            !aggregator.record(0, outcome("A/testfile1", Verdict::Fail)),
            "second record is rejected"
        );

        let stats = aggregator.stats();
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 0, "first write wins");
        assert_eq!(stats.final_run_count, 1);
    }

    #[test]
    fn summary_preserves_submission_order() {
        let aggregator =
            RunAggregator::new(names(&["A/testfile1", "A/testfile2", "B/testfile1"]), 3);
        // Completion order deliberately scrambled.
        aggregator.record(2, outcome("B/testfile1", Verdict::Error));
        aggregator.record(0, outcome("A/testfile1", Verdict::Pass));
        aggregator.record(1, outcome("A/testfile2", Verdict::Fail));

        let summary = aggregator.finalize(Duration::ZERO);
        let ordered: Vec<_> = summary.cases.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(ordered, vec!["A/testfile1", "A/testfile2", "B/testfile1"]);

        let verdicts: Vec<_> = summary
            .cases
            .iter()
            .map(|(_, state)| match state {
                CaseState::Done(outcome) => outcome.verdict,
                other => panic!("unexpected state {other:?}"),
            })
            .collect();
        assert_eq!(verdicts, vec![Verdict::Pass, Verdict::Fail, Verdict::Error]);
    }

    #[test]
    fn snapshot_is_a_consistent_partial_view() {
        let aggregator = RunAggregator::new(names(&["t1", "t2"]), 2);
        aggregator.record(1, outcome("t2", Verdict::Pass));

        let snapshot = aggregator.snapshot(Duration::from_secs(1));
        assert_eq!(snapshot.stats.final_run_count, 1);
        assert!(matches!(snapshot.cases[0].1, CaseState::Pending));
        assert!(matches!(snapshot.cases[1].1, CaseState::Done(_)));
    }

    #[test]
    fn concurrent_records_never_lose_outcomes() {
        let count = 64;
        let aggregator = std::sync::Arc::new(RunAggregator::new(
            (0..count).map(|i| format!("t{i}")).collect(),
            count,
        ));
        let handles: Vec<_> = (0..count)
            .map(|index| {
                let aggregator = std::sync::Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    aggregator.record(index, outcome(&format!("t{index}"), Verdict::Pass))
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        let stats = aggregator.stats();
        assert_eq!(stats.passed, count);
        assert_eq!(stats.final_run_count, count);
    }

    #[test]
    fn stats_success_rules() {
        assert!(RunStats::default().is_success(), "empty run is a success");
        assert!(
            RunStats {
                initial_run_count: 3,
                final_run_count: 3,
                passed: 3,
                ..RunStats::default()
            }
            .is_success()
        );
        assert!(
            !RunStats {
                initial_run_count: 3,
                final_run_count: 2,
                passed: 2,
                cancelled: 1,
                ..RunStats::default()
            }
            .is_success(),
            "cancelled run is not a success"
        );
        assert!(
            !RunStats {
                initial_run_count: 1,
                final_run_count: 1,
                errored: 1,
                ..RunStats::default()
            }
            .is_success()
        );
        assert!(
            RunStats {
                initial_run_count: 1,
                final_run_count: 1,
                passed: 1,
                skipped: 4,
                ..RunStats::default()
            }
            .is_success(),
            "skips are not failures"
        );
    }

    #[test]
    fn fatal_summary_has_no_cases() {
        let summary = RunSummary::fatal("javac exited with code 1", Duration::ZERO);
        assert!(summary.fatal.is_some());
        assert!(summary.cases.is_empty());
        assert_eq!(summary.stats, RunStats::default());
    }
}
