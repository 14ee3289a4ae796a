use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::SourceKind;

/// Hard cap on collected error details so a pathological input cannot balloon
/// the retained result. The `errors` counter keeps counting past the cap.
const MAX_ERROR_DETAILS: usize = 100;

/// Terminal outcome of one import run.
///
/// A run that finished with per-record failures is still `Completed`;
/// `Failed` is reserved for runs that could not produce a coherent result
/// (fatal parse error, aborted write plane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// Live state of one import kind, reported by the status route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
}

/// Mutable per-run accounting owned exclusively by the orchestrator.
///
/// Created at run start, updated while the run executes, then frozen into an
/// [`ImportReport`] at completion.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub source: SourceKind,
    pub total: u32,
    pub imported: u32,
    pub updated: u32,
    pub skipped: u32,
    /// Records that were rejected or lost to a write failure.
    pub failed: u32,
    /// Every reported problem, including non-record ones (hierarchy reports,
    /// concurrent-claim notes). Always >= the retained detail count.
    pub errors: u32,
    error_details: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    outcome: Option<RunOutcome>,
    failure_message: Option<String>,
}

impl ImportResult {
    pub fn start(source: SourceKind) -> Self {
        Self {
            source,
            total: 0,
            imported: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            errors: 0,
            error_details: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
            failure_message: None,
        }
    }

    /// Records one rejected or failed record with its source context.
    pub fn add_error(&mut self, context: &str, message: impl AsRef<str>) {
        self.failed += 1;
        self.errors += 1;
        self.push_detail(format!("[{}] {}", context, message.as_ref()));
    }

    /// Records a reported problem that did not cost a record its write, e.g. a
    /// dangling-parent report for a record that was still imported as a root.
    pub fn add_problem(&mut self, message: impl Into<String>) {
        self.errors += 1;
        self.push_detail(message.into());
    }

    fn push_detail(&mut self, detail: String) {
        if self.error_details.len() < MAX_ERROR_DETAILS {
            self.error_details.push(detail);
        }
    }

    pub fn error_details(&self) -> &[String] {
        &self.error_details
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| (completed - self.started_at).num_seconds())
    }

    /// Percentage of processed records that were imported or updated.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.imported + self.updated) * 100.0 / f64::from(self.total)
    }

    /// Freezes this result as completed and returns the immutable report.
    pub fn complete(mut self) -> ImportReport {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(RunOutcome::Completed);
        self.into_report()
    }

    /// Freezes this result as failed, keeping whatever partial counts the run
    /// accumulated before the fatal error.
    pub fn fail(mut self, message: impl Into<String>) -> ImportReport {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(RunOutcome::Failed);
        self.failure_message = Some(message.into());
        self.into_report()
    }

    fn into_report(self) -> ImportReport {
        let duration_seconds = self.duration_seconds();
        let success_rate = self.success_rate();
        ImportReport {
            source: self.source.as_str(),
            outcome: self.outcome.unwrap_or(RunOutcome::Failed),
            total: self.total,
            imported: self.imported,
            updated: self.updated,
            skipped: self.skipped,
            failed: self.failed,
            errors: self.errors,
            error_details: self.error_details,
            failure_message: self.failure_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds,
            success_rate,
        }
    }
}

/// Immutable, JSON-serializable summary of one finished import run.
///
/// This is the shape returned by the trigger and last-result routes and kept
/// as process-wide "last result" state until the next run overwrites it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub source: &'static str,
    pub outcome: RunOutcome,
    pub total: u32,
    pub imported: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errors: u32,
    pub error_details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub success_rate: f64,
}

impl ImportReport {
    pub fn is_failed(&self) -> bool {
        self.outcome == RunOutcome::Failed
    }

    /// Folds another run's counters into this one.
    ///
    /// Used by multi-file imports (e.g. every US Code title in sequence): the
    /// aggregate keeps the earliest start, the latest completion, the combined
    /// counters, and turns `Failed` if any constituent run failed.
    pub fn absorb(&mut self, other: &ImportReport) {
        self.total += other.total;
        self.imported += other.imported;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors += other.errors;
        for detail in &other.error_details {
            if self.error_details.len() >= MAX_ERROR_DETAILS {
                break;
            }
            self.error_details.push(detail.clone());
        }

        if other.started_at < self.started_at {
            self.started_at = other.started_at;
        }
        self.completed_at = match (self.completed_at, other.completed_at) {
            (Some(mine), Some(theirs)) => Some(mine.max(theirs)),
            (mine, theirs) => mine.or(theirs),
        };
        self.duration_seconds = self
            .completed_at
            .map(|completed| (completed - self.started_at).num_seconds());

        if other.outcome == RunOutcome::Failed {
            self.outcome = RunOutcome::Failed;
            if self.failure_message.is_none() {
                self.failure_message = other.failure_message.clone();
            }
        }

        self.success_rate = if self.total == 0 {
            0.0
        } else {
            f64::from(self.imported + self.updated) * 100.0 / f64::from(self.total)
        };
    }

    /// Multi-line human-readable summary for logs and the one-shot CLI.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} import {}: {} records in {}s\n",
            self.source,
            match self.outcome {
                RunOutcome::Completed => "complete",
                RunOutcome::Failed => "FAILED",
            },
            self.total,
            self.duration_seconds.unwrap_or(0),
        );
        out.push_str(&format!("  imported: {}\n", self.imported));
        out.push_str(&format!("  updated:  {}\n", self.updated));
        out.push_str(&format!("  skipped:  {}\n", self.skipped));
        out.push_str(&format!("  errors:   {}\n", self.errors));
        out.push_str(&format!("  success rate: {:.1}%", self.success_rate));
        if let Some(message) = &self.failure_message {
            out.push_str(&format!("\n  failure: {message}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_counts_imported_and_updated() {
        let mut result = ImportResult::start(SourceKind::Govman);
        result.total = 4;
        result.imported = 2;
        result.updated = 1;
        result.skipped = 1;
        assert!((result.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn success_rate_of_empty_run_is_zero() {
        let result = ImportResult::start(SourceKind::UsCode);
        assert_eq!(result.success_rate(), 0.0);
    }

    #[test]
    fn error_details_are_capped_but_counter_keeps_counting() {
        let mut result = ImportResult::start(SourceKind::Govman);
        for idx in 0..150 {
            result.add_error(&format!("TEST-{idx}"), "missing AgencyName");
        }

        assert_eq!(result.failed, 150);
        assert_eq!(result.error_details().len(), 100);
    }

    #[test]
    fn failed_report_keeps_partial_counts() {
        let mut result = ImportResult::start(SourceKind::UsCode);
        result.total = 10;
        result.imported = 7;

        let report = result.fail("batch write aborted");
        assert!(report.is_failed());
        assert_eq!(report.imported, 7);
        assert_eq!(report.failure_message.as_deref(), Some("batch write aborted"));
        assert!(report.completed_at.is_some());
    }

    #[test]
    fn absorb_combines_counters_and_escalates_failure() {
        let mut first = ImportResult::start(SourceKind::UsCode);
        first.total = 10;
        first.imported = 10;
        let mut aggregate = first.complete();

        let mut second = ImportResult::start(SourceKind::UsCode);
        second.total = 5;
        second.imported = 2;
        second.add_error("/us/usc/t2/s1", "write failed");
        let failed = second.fail("batch write aborted");

        aggregate.absorb(&failed);
        assert_eq!(aggregate.total, 15);
        assert_eq!(aggregate.imported, 12);
        assert_eq!(aggregate.failed, 1);
        assert!(aggregate.is_failed());
        assert_eq!(
            aggregate.failure_message.as_deref(),
            Some("batch write aborted")
        );
        assert!((aggregate.success_rate - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn report_serializes_expected_field_names() {
        let report = ImportResult::start(SourceKind::Govman).complete();
        let json = serde_json::to_value(&report).expect("report should serialize");

        assert_eq!(json["source"], "GOVMAN");
        assert_eq!(json["outcome"], "completed");
        assert!(json.get("errorDetails").is_some());
        assert!(json.get("durationSeconds").is_some());
        assert!(json.get("successRate").is_some());
    }
}
