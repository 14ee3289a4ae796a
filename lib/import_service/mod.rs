pub mod convert;
mod engine;
pub mod govman_parser;
pub mod hierarchy;
pub mod matcher;
pub mod result;
mod run_guard;
pub mod types;
pub mod uslm_parser;
pub mod writer;

use std::collections::HashMap;
use std::io::BufRead;

use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tokio::sync::RwLock;

use crate::db::schema::{organizations, statutes};

pub use engine::ImportEngine;
pub use result::{ImportReport, ImportResult, RunOutcome, RunStatus};
pub use run_guard::{RunGuard, RunPermit};
pub use types::{ImportConfig, ImportError, SourceKind};

use types::PersistError;

use matcher::PgNaturalKeyIndex;
use writer::PgBatchWriter;

/// Default US Code release point used when the caller does not pin one.
pub const DEFAULT_RELEASE_POINT: &str = "119-21";

/// Facade owning the run lifecycle for every import kind.
///
/// Holds the single-flight guard and the per-kind last results; each run gets
/// fresh Postgres-backed pipeline components over the shared pool. The byte
/// stream itself comes from the caller (upload, file, download service).
pub struct ImportService {
    pool: Pool<AsyncPgConnection>,
    config: ImportConfig,
    guard: RunGuard,
    last_results: RwLock<HashMap<SourceKind, ImportReport>>,
}

impl ImportService {
    pub fn new(pool: Pool<AsyncPgConnection>, config: ImportConfig) -> Self {
        Self {
            pool,
            config,
            guard: RunGuard::new(),
            last_results: RwLock::new(HashMap::new()),
        }
    }

    /// Runs one import to completion and retains its report as last result.
    ///
    /// Errors only when another run of the same kind is in flight; every other
    /// failure mode is folded into the returned report (a `Failed` report
    /// still carries whatever partial counts committed before the fault).
    pub async fn run_import(
        &self,
        kind: SourceKind,
        xml: Box<dyn BufRead + Send>,
        release_point: Option<&str>,
    ) -> Result<ImportReport, ImportError> {
        let permit = self.guard.try_acquire(kind)?;

        let index = PgNaturalKeyIndex::new(self.pool.clone(), kind);
        let writer = PgBatchWriter::new(self.pool.clone());
        let engine = ImportEngine::new(index, writer, self.config);

        let report = match kind {
            SourceKind::Govman => engine.run_govman(xml).await,
            SourceKind::UsCode => {
                engine
                    .run_uscode(xml, release_point.unwrap_or(DEFAULT_RELEASE_POINT))
                    .await
            }
        };

        if let Some(metrics) = crate::server::monitoring::IMPORT_METRICS.get() {
            metrics.observe_report(&report);
        }
        self.last_results.write().await.insert(kind, report.clone());

        // Release the run slot before the caller sees the report.
        drop(permit);
        Ok(report)
    }

    pub fn status(&self, kind: SourceKind) -> RunStatus {
        self.guard.status(kind)
    }

    pub async fn last_result(&self, kind: SourceKind) -> Option<ImportReport> {
        self.last_results.read().await.get(&kind).cloned()
    }

    /// Counts rows this pipeline has written, by its `import_source` tag.
    pub async fn stored_count(&self, kind: SourceKind) -> Result<i64, PersistError> {
        let mut conn = self.pool.get().await.map_err(|err| {
            PersistError::retryable(format!("failed to acquire DB pool connection: {err}"))
        })?;

        let count = match kind {
            SourceKind::Govman => organizations::table
                .filter(organizations::import_source.eq(kind.as_str()))
                .count()
                .get_result::<i64>(&mut conn)
                .await
                .map_err(writer::map_diesel_error)?,
            SourceKind::UsCode => statutes::table
                .filter(statutes::import_source.eq(kind.as_str()))
                .count()
                .get_result::<i64>(&mut conn)
                .await
                .map_err(writer::map_diesel_error)?,
        };

        Ok(count)
    }
}
