use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use diesel::insert_into;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;
use log::{debug, warn};

use crate::db::models::{NewOrganization, NewStatute, OrganizationPatch, StatutePatch};
use crate::db::schema::{organizations, statutes};

use super::result::ImportResult;
use super::types::{ImportConfig, PersistError, RetryPolicy};

/// One decided mutation, ready for the write plane.
#[derive(Debug, Clone)]
pub enum PlannedWrite {
    CreateOrganization(NewOrganization),
    UpdateOrganization { id: i64, patch: OrganizationPatch },
    CreateStatute(NewStatute),
    UpdateStatute { id: i64, patch: StatutePatch },
}

/// A planned write plus the source identifier used for error context and
/// parent-link mapping.
#[derive(Debug, Clone)]
pub struct PlannedRecord {
    pub external_id: String,
    pub write: PlannedWrite,
}

/// What actually happened to one record inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { id: i64 },
    Updated { id: i64 },
    /// A concurrent writer claimed the natural key between matching and
    /// writing. The intended create is demoted to a skip, never allowed to
    /// overwrite the winner.
    LateDuplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWriteOutcome {
    pub external_id: String,
    pub outcome: WriteOutcome,
}

/// Child/parent row-id pair for the second GOVMAN pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub child_id: i64,
    pub parent_id: i64,
}

/// Persists decided writes in transactional batches.
///
/// This is intentionally abstracted so batching, counting, and abort behavior
/// can be tested against scripted persistence failures without a Postgres
/// instance.
pub trait BatchWriter: Send + Sync {
    /// Applies one batch as a single atomic unit: either every record in the
    /// batch commits or none do.
    fn apply_batch<'a>(
        &'a self,
        batch: &'a [PlannedRecord],
    ) -> BoxFuture<'a, Result<Vec<RecordWriteOutcome>, PersistError>>;

    fn link_parents<'a>(
        &'a self,
        links: &'a [ParentLink],
    ) -> BoxFuture<'a, Result<(), PersistError>>;
}

impl<T> BatchWriter for Arc<T>
where
    T: BatchWriter + ?Sized,
{
    fn apply_batch<'a>(
        &'a self,
        batch: &'a [PlannedRecord],
    ) -> BoxFuture<'a, Result<Vec<RecordWriteOutcome>, PersistError>> {
        (**self).apply_batch(batch)
    }

    fn link_parents<'a>(
        &'a self,
        links: &'a [ParentLink],
    ) -> BoxFuture<'a, Result<(), PersistError>> {
        (**self).link_parents(links)
    }
}

/// Postgres-backed batch writer used by the production runtime.
pub struct PgBatchWriter {
    pool: Pool<AsyncPgConnection>,
}

impl PgBatchWriter {
    pub fn new(pool: Pool<AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

impl BatchWriter for PgBatchWriter {
    fn apply_batch<'a>(
        &'a self,
        batch: &'a [PlannedRecord],
    ) -> BoxFuture<'a, Result<Vec<RecordWriteOutcome>, PersistError>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(Vec::new());
            }

            let mut conn = self.pool.get().await.map_err(|err| {
                PersistError::retryable(format!("failed to acquire DB pool connection: {err}"))
            })?;

            conn.transaction::<Vec<RecordWriteOutcome>, DieselError, _>(|conn| {
                async move {
                    let mut outcomes = Vec::with_capacity(batch.len());
                    for record in batch {
                        let outcome = match &record.write {
                            PlannedWrite::CreateOrganization(row) => {
                                // ON CONFLICT DO NOTHING surfaces a concurrent
                                // natural-key claim as "no row returned"
                                // instead of aborting the transaction.
                                let id: Option<i64> = insert_into(organizations::table)
                                    .values(row)
                                    .on_conflict(organizations::external_id)
                                    .do_nothing()
                                    .returning(organizations::id)
                                    .get_result(conn)
                                    .await
                                    .optional()?;
                                match id {
                                    Some(id) => WriteOutcome::Created { id },
                                    None => WriteOutcome::LateDuplicate,
                                }
                            }
                            PlannedWrite::UpdateOrganization { id, patch } => {
                                diesel::update(
                                    organizations::table.filter(organizations::id.eq(*id)),
                                )
                                .set(patch)
                                .execute(conn)
                                .await?;
                                WriteOutcome::Updated { id: *id }
                            }
                            PlannedWrite::CreateStatute(row) => {
                                let id: Option<i64> = insert_into(statutes::table)
                                    .values(row)
                                    .on_conflict(statutes::usc_identifier)
                                    .do_nothing()
                                    .returning(statutes::id)
                                    .get_result(conn)
                                    .await
                                    .optional()?;
                                match id {
                                    Some(id) => WriteOutcome::Created { id },
                                    None => WriteOutcome::LateDuplicate,
                                }
                            }
                            PlannedWrite::UpdateStatute { id, patch } => {
                                diesel::update(statutes::table.filter(statutes::id.eq(*id)))
                                    .set(patch)
                                    .execute(conn)
                                    .await?;
                                WriteOutcome::Updated { id: *id }
                            }
                        };
                        outcomes.push(RecordWriteOutcome {
                            external_id: record.external_id.clone(),
                            outcome,
                        });
                    }
                    Ok(outcomes)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)
        })
    }

    fn link_parents<'a>(
        &'a self,
        links: &'a [ParentLink],
    ) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            if links.is_empty() {
                return Ok(());
            }

            let mut conn = self.pool.get().await.map_err(|err| {
                PersistError::retryable(format!("failed to acquire DB pool connection: {err}"))
            })?;

            conn.transaction::<(), DieselError, _>(|conn| {
                async move {
                    for link in links {
                        diesel::update(
                            organizations::table.filter(organizations::id.eq(link.child_id)),
                        )
                        .set(organizations::parent_id.eq(Some(link.parent_id)))
                        .execute(conn)
                        .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)
        })
    }
}

pub(crate) fn map_diesel_error(error: DieselError) -> PersistError {
    match error {
        DieselError::DatabaseError(kind, info) => match kind {
            DatabaseErrorKind::SerializationFailure
            | DatabaseErrorKind::ClosedConnection
            | DatabaseErrorKind::UnableToSendCommand => PersistError::retryable(format!(
                "transient database error ({kind:?}): {}",
                info.message()
            )),
            _ => PersistError::fatal(format!(
                "fatal database error ({kind:?}): {}",
                info.message()
            )),
        },
        DieselError::RollbackTransaction => {
            PersistError::retryable("transaction rollback requested by database".to_string())
        }
        other => PersistError::fatal(format!("fatal diesel error: {other}")),
    }
}

/// Applies decided writes in fixed-size batches with transient-failure retry.
///
/// Counters accumulate into `result`; committed row ids land in `id_map`
/// keyed by external id for the parent-link pass. On a batch failure the
/// batch's records are counted failed and the error is returned so the
/// orchestrator can abort remaining batches; batches that already committed
/// are never rolled back.
pub async fn apply_in_batches<W: BatchWriter>(
    writer: &W,
    planned: &[PlannedRecord],
    config: &ImportConfig,
    result: &mut ImportResult,
    id_map: &mut HashMap<String, i64>,
) -> Result<(), PersistError> {
    let batch_size = config.batch_policy.max_records.max(1);
    let batches: Vec<&[PlannedRecord]> = planned.chunks(batch_size).collect();

    for (batch_idx, batch) in batches.iter().enumerate() {
        let outcomes =
            write_batch_with_retry(writer, batch, &config.retry_policy, config.batch_policy.write_timeout)
                .await;

        match outcomes {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome.outcome {
                        WriteOutcome::Created { id } => {
                            result.imported += 1;
                            id_map.insert(outcome.external_id, id);
                        }
                        WriteOutcome::Updated { id } => {
                            result.updated += 1;
                            id_map.insert(outcome.external_id, id);
                        }
                        WriteOutcome::LateDuplicate => {
                            result.skipped += 1;
                            result.add_problem(format!(
                                "[{}] natural key was claimed concurrently; record skipped",
                                outcome.external_id
                            ));
                        }
                    }
                }
                debug!("committed batch of {} records", batch.len());
            }
            Err(err) => {
                warn!("batch of {} records failed: {}", batch.len(), err.message);
                for record in *batch {
                    result.add_error(&record.external_id, &err.message);
                }
                // Escalate to the rest of the run: later batches are never
                // attempted, but batches that already committed stand.
                for later_batch in &batches[batch_idx + 1..] {
                    for record in *later_batch {
                        result.add_error(
                            &record.external_id,
                            "not attempted: aborted after earlier batch failure",
                        );
                    }
                }
                return Err(err);
            }
        }
    }

    Ok(())
}

async fn write_batch_with_retry<W: BatchWriter>(
    writer: &W,
    batch: &[PlannedRecord],
    retry_policy: &RetryPolicy,
    write_timeout: Duration,
) -> Result<Vec<RecordWriteOutcome>, PersistError> {
    let max_attempts = retry_policy.max_attempts.max(1);

    let mut attempt = 1;
    loop {
        let attempt_result = tokio::time::timeout(write_timeout, writer.apply_batch(batch))
            .await
            .unwrap_or_else(|_| {
                Err(PersistError::retryable(format!(
                    "batch write timed out after {}ms",
                    write_timeout.as_millis()
                )))
            });

        match attempt_result {
            Ok(outcomes) => return Ok(outcomes),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = compute_backoff_delay(retry_policy, attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn compute_backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if policy.initial_backoff.is_zero() {
        return Duration::ZERO;
    }

    let shift = u32::min(attempt.saturating_sub(1), 20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());
    Duration::from_millis(capped_ms.min(u64::MAX as u128) as u64)
}
