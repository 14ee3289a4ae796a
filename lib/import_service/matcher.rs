use std::collections::HashSet;
use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use crate::db::schema::{organizations, statutes};

use super::types::{MatchDecision, PersistError, RejectReason, SourceKind};
use super::writer::map_diesel_error;

/// Minimal view of one persisted row, enough to make a match decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: i64,
    pub natural_key: Option<String>,
    pub import_source: Option<String>,
}

/// Read-side seam into the persisted store.
///
/// This trait exists so matching logic can be unit-tested against scripted
/// store contents without a live database.
pub trait NaturalKeyIndex: Send + Sync {
    /// Exact lookup on the source-specific natural key.
    fn find_by_natural_key<'a>(
        &'a self,
        natural_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>>;

    /// Case-insensitive, whitespace-trimmed name lookup. Sources without a
    /// name fallback never call this.
    fn find_by_normalized_name<'a>(
        &'a self,
        normalized_name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>>;
}

impl<'t, T> NaturalKeyIndex for &'t T
where
    T: NaturalKeyIndex + ?Sized,
{
    fn find_by_natural_key<'a>(
        &'a self,
        natural_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>> {
        (**self).find_by_natural_key(natural_key)
    }

    fn find_by_normalized_name<'a>(
        &'a self,
        normalized_name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>> {
        (**self).find_by_normalized_name(normalized_name)
    }
}

impl<T> NaturalKeyIndex for Arc<T>
where
    T: NaturalKeyIndex + ?Sized,
{
    fn find_by_natural_key<'a>(
        &'a self,
        natural_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>> {
        (**self).find_by_natural_key(natural_key)
    }

    fn find_by_normalized_name<'a>(
        &'a self,
        normalized_name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>> {
        (**self).find_by_normalized_name(normalized_name)
    }
}

/// Canonical form used for the secondary name match.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Classifies incoming records against the persisted store.
///
/// The primary path is an exact natural-key lookup. The secondary path is a
/// normalized-name fallback for sources whose records may predate stable
/// external ids; it only ever auto-matches a single candidate that this same
/// pipeline wrote earlier. Multiple candidates, hand-curated rows, and rows
/// owned by another source are all rejected for operator review, never
/// merged.
pub struct NaturalKeyMatcher<I: NaturalKeyIndex> {
    index: I,
    import_source: &'static str,
    seen_keys: HashSet<String>,
    seen_names: HashSet<String>,
}

impl<I: NaturalKeyIndex> NaturalKeyMatcher<I> {
    pub fn new(index: I, import_source: &'static str) -> Self {
        Self {
            index,
            import_source,
            seen_keys: HashSet::new(),
            seen_names: HashSet::new(),
        }
    }

    /// Classifies one record within a batch import run.
    ///
    /// Run-scoped state makes repeated keys and colliding names within a
    /// single input deterministic: the first occurrence wins, later ones are
    /// rejected rather than racing each other through the writer.
    pub async fn match_record(
        &mut self,
        natural_key: &str,
        fallback_name: Option<&str>,
    ) -> Result<MatchDecision, PersistError> {
        if !self.seen_keys.insert(natural_key.to_string()) {
            return Ok(MatchDecision::Reject(RejectReason::DuplicateKeyInRun));
        }

        if let Some(existing) = self.index.find_by_natural_key(natural_key).await? {
            if let Some(name) = fallback_name {
                self.seen_names.insert(normalize_name(name));
            }
            return Ok(MatchDecision::UpdateExisting(existing.id));
        }

        let Some(name) = fallback_name else {
            return Ok(MatchDecision::Create);
        };

        let normalized = normalize_name(name);
        if !self.seen_names.insert(normalized.clone()) {
            return Ok(MatchDecision::Reject(RejectReason::NameCollisionInRun));
        }

        let candidates = self.index.find_by_normalized_name(&normalized).await?;
        match candidates.as_slice() {
            [] => Ok(MatchDecision::Create),
            [single] => {
                if single.import_source.as_deref() == Some(self.import_source) {
                    Ok(MatchDecision::UpdateExisting(single.id))
                } else {
                    Ok(MatchDecision::Reject(RejectReason::ProtectedRecord {
                        existing_id: single.id,
                    }))
                }
            }
            many => Ok(MatchDecision::Reject(RejectReason::AmbiguousName {
                candidates: many.len(),
            })),
        }
    }

    /// Classifies one operator-triggered single import.
    ///
    /// Without the explicit override flag an existing record is never touched;
    /// this is the safety rail against accidental overwrite from manual
    /// action.
    pub async fn match_single(
        &self,
        natural_key: &str,
        force_overwrite: bool,
    ) -> Result<MatchDecision, PersistError> {
        match self.index.find_by_natural_key(natural_key).await? {
            Some(existing) if force_overwrite => Ok(MatchDecision::UpdateExisting(existing.id)),
            Some(existing) => Ok(MatchDecision::SkipDuplicate(existing.id)),
            None => Ok(MatchDecision::Create),
        }
    }

    /// Exact-key existence probe.
    ///
    /// The cross-source duplicate annotation path goes through here so the
    /// "exact key wins, no fuzzy auto-merge" contract has exactly one
    /// implementation.
    pub async fn find_existing(&self, natural_key: &str) -> Result<Option<i64>, PersistError> {
        Ok(self
            .index
            .find_by_natural_key(natural_key)
            .await?
            .map(|existing| existing.id))
    }
}

/// Postgres-backed read index used by the production runtime.
pub struct PgNaturalKeyIndex {
    pool: Pool<AsyncPgConnection>,
    kind: SourceKind,
}

impl PgNaturalKeyIndex {
    pub fn new(pool: Pool<AsyncPgConnection>, kind: SourceKind) -> Self {
        Self { pool, kind }
    }
}

impl NaturalKeyIndex for PgNaturalKeyIndex {
    fn find_by_natural_key<'a>(
        &'a self,
        natural_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(|err| {
                PersistError::retryable(format!("failed to acquire DB pool connection: {err}"))
            })?;

            let row = match self.kind {
                SourceKind::Govman => organizations::table
                    .filter(organizations::external_id.eq(natural_key))
                    .select((
                        organizations::id,
                        organizations::external_id,
                        organizations::import_source,
                    ))
                    .first::<(i64, Option<String>, Option<String>)>(&mut conn)
                    .await
                    .optional()
                    .map_err(map_diesel_error)?
                    .map(|(id, natural_key, import_source)| StoredRecord {
                        id,
                        natural_key,
                        import_source,
                    }),
                SourceKind::UsCode => statutes::table
                    .filter(statutes::usc_identifier.eq(natural_key))
                    .select((
                        statutes::id,
                        statutes::usc_identifier,
                        statutes::import_source,
                    ))
                    .first::<(i64, String, Option<String>)>(&mut conn)
                    .await
                    .optional()
                    .map_err(map_diesel_error)?
                    .map(|(id, natural_key, import_source)| StoredRecord {
                        id,
                        natural_key: Some(natural_key),
                        import_source,
                    }),
            };

            Ok(row)
        })
    }

    fn find_by_normalized_name<'a>(
        &'a self,
        normalized_name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>> {
        Box::pin(async move {
            // Statute identifiers are stable; only organizations carry the
            // name fallback.
            if self.kind != SourceKind::Govman {
                return Ok(Vec::new());
            }

            let mut conn = self.pool.get().await.map_err(|err| {
                PersistError::retryable(format!("failed to acquire DB pool connection: {err}"))
            })?;

            let rows = organizations::table
                .filter(organizations::normalized_name.eq(normalized_name))
                .select((
                    organizations::id,
                    organizations::external_id,
                    organizations::import_source,
                ))
                .load::<(i64, Option<String>, Option<String>)>(&mut conn)
                .await
                .map_err(map_diesel_error)?;

            Ok(rows
                .into_iter()
                .map(|(id, natural_key, import_source)| StoredRecord {
                    id,
                    natural_key,
                    import_source,
                })
                .collect())
        })
    }
}
