use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

use crate::build_info;
use crate::import_service::{ImportReport, RunOutcome};

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so the metric is valid for
/// Prometheus text exposition format and still carries stable build labels.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "govdata_worker",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

/// Label set for immutable build identity.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

/// Label set distinguishing pipelines on shared import metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    pub source: String,
}

#[derive(Clone)]
pub struct ImportMetrics {
    /// Import runs that reached a terminal state, by source.
    pub runs_completed_total: Family<SourceLabels, Counter>,
    /// Import runs that terminated failed, by source.
    pub runs_failed_total: Family<SourceLabels, Counter>,
    /// Records seen by the pipeline, by source.
    pub records_processed_total: Family<SourceLabels, Counter>,
    /// Records newly created, by source.
    pub records_imported_total: Family<SourceLabels, Counter>,
    /// Records updated in place, by source.
    pub records_updated_total: Family<SourceLabels, Counter>,
    /// Records skipped as duplicates, by source.
    pub records_skipped_total: Family<SourceLabels, Counter>,
    /// Records rejected or lost to write failures, by source.
    pub records_failed_total: Family<SourceLabels, Counter>,
    /// Wall-clock seconds of the most recent run, by source.
    pub last_run_duration_seconds: Family<SourceLabels, Gauge>,
    /// Integer success percentage (0-100) of the most recent run, by source.
    pub last_run_success_percent: Family<SourceLabels, Gauge>,
}

impl ImportMetrics {
    fn init() -> Self {
        Self {
            runs_completed_total: Family::default(),
            runs_failed_total: Family::default(),
            records_processed_total: Family::default(),
            records_imported_total: Family::default(),
            records_updated_total: Family::default(),
            records_skipped_total: Family::default(),
            records_failed_total: Family::default(),
            last_run_duration_seconds: Family::default(),
            last_run_success_percent: Family::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "runs_completed",
            "Total import runs that reached a terminal state",
            metrics.runs_completed_total.clone(),
        );
        sub_registry.register(
            "runs_failed",
            "Total import runs that terminated failed",
            metrics.runs_failed_total.clone(),
        );
        sub_registry.register(
            "records_processed",
            "Total records seen by the import pipeline",
            metrics.records_processed_total.clone(),
        );
        sub_registry.register(
            "records_imported",
            "Total records newly created by imports",
            metrics.records_imported_total.clone(),
        );
        sub_registry.register(
            "records_updated",
            "Total records updated in place by imports",
            metrics.records_updated_total.clone(),
        );
        sub_registry.register(
            "records_skipped",
            "Total records skipped as duplicates by imports",
            metrics.records_skipped_total.clone(),
        );
        sub_registry.register(
            "records_failed",
            "Total records rejected or lost to write failures",
            metrics.records_failed_total.clone(),
        );
        sub_registry.register(
            "last_run_duration_seconds",
            "Wall-clock duration of the most recent import run",
            metrics.last_run_duration_seconds.clone(),
        );
        sub_registry.register(
            "last_run_success_percent",
            "Success percentage of the most recent import run",
            metrics.last_run_success_percent.clone(),
        );
        metrics
    }

    /// Folds one finished run into the counters and last-run gauges.
    pub fn observe_report(&self, report: &ImportReport) {
        let labels = SourceLabels {
            source: report.source.to_string(),
        };

        self.runs_completed_total.get_or_create(&labels).inc();
        if report.outcome == RunOutcome::Failed {
            self.runs_failed_total.get_or_create(&labels).inc();
        }
        self.records_processed_total
            .get_or_create(&labels)
            .inc_by(u64::from(report.total));
        self.records_imported_total
            .get_or_create(&labels)
            .inc_by(u64::from(report.imported));
        self.records_updated_total
            .get_or_create(&labels)
            .inc_by(u64::from(report.updated));
        self.records_skipped_total
            .get_or_create(&labels)
            .inc_by(u64::from(report.skipped));
        self.records_failed_total
            .get_or_create(&labels)
            .inc_by(u64::from(report.failed));
        self.last_run_duration_seconds
            .get_or_create(&labels)
            .set(report.duration_seconds.unwrap_or(0));
        self.last_run_success_percent
            .get_or_create(&labels)
            .set(report.success_rate as i64);
    }
}

pub static IMPORT_METRICS: OnceCell<ImportMetrics> = OnceCell::const_new();
