use serde::Serialize;

use crate::import_service::matcher::{NaturalKeyIndex, NaturalKeyMatcher};
use crate::import_service::types::PersistError;
use crate::registry_client::congress::CongressMember;
use crate::registry_client::federal_register::FederalRegisterDocument;
use crate::registry_client::legislators::LegislatorRecord;

/// A live-search candidate that knows its store natural key.
///
/// Candidates without a usable key (the registries occasionally return
/// partial rows) simply annotate as "no match".
pub trait NaturalKeyed {
    fn natural_key(&self) -> Option<String>;
}

impl NaturalKeyed for CongressMember {
    fn natural_key(&self) -> Option<String> {
        if self.bioguide_id.trim().is_empty() {
            return None;
        }
        Some(format!("BIOGUIDE:{}", self.bioguide_id.trim()))
    }
}

impl NaturalKeyed for FederalRegisterDocument {
    fn natural_key(&self) -> Option<String> {
        if self.document_number.trim().is_empty() {
            return None;
        }
        Some(format!("FRDOC:{}", self.document_number.trim()))
    }
}

impl NaturalKeyed for LegislatorRecord {
    fn natural_key(&self) -> Option<String> {
        self.id
            .bioguide
            .as_deref()
            .map(str::trim)
            .filter(|bioguide| !bioguide.is_empty())
            .map(|bioguide| format!("BIOGUIDE:{bioguide}"))
    }
}

/// How strong a duplicate-check match is. Exact natural-key matches are the
/// only kind this service produces; fuzzy auto-merge is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Exact,
    None,
}

/// One annotated live-search result, shown to an operator before they decide
/// to import. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateAnnotation<T> {
    pub candidate: T,
    pub existing_id: Option<i64>,
    pub confidence: MatchConfidence,
}

/// Annotates live registry results with local-store duplicate information.
///
/// Reuses the natural-key matcher's exact-key probe rather than re-implement
/// it: the contract (exact key wins, no silent fuzzy auto-merge) has exactly
/// one home. Lookups never mutate the store.
pub struct DuplicateService<I: NaturalKeyIndex> {
    matcher: NaturalKeyMatcher<I>,
}

impl<I: NaturalKeyIndex> DuplicateService<I> {
    pub fn new(index: I) -> Self {
        Self {
            matcher: NaturalKeyMatcher::new(index, "LIVE_SEARCH"),
        }
    }

    /// Returns the existing row id for one candidate, if any.
    pub async fn check_duplicate(
        &self,
        candidate: &impl NaturalKeyed,
    ) -> Result<Option<i64>, PersistError> {
        match candidate.natural_key() {
            Some(natural_key) => self.matcher.find_existing(&natural_key).await,
            None => Ok(None),
        }
    }

    /// Annotates a page of candidates in result order.
    pub async fn annotate<T: NaturalKeyed>(
        &self,
        candidates: Vec<T>,
    ) -> Result<Vec<DuplicateAnnotation<T>>, PersistError> {
        let mut annotated = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let existing_id = self.check_duplicate(&candidate).await?;
            let confidence = if existing_id.is_some() {
                MatchConfidence::Exact
            } else {
                MatchConfidence::None
            };
            annotated.push(DuplicateAnnotation {
                candidate,
                existing_id,
                confidence,
            });
        }
        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import_service::matcher::StoredRecord;
    use futures::future::BoxFuture;
    use std::collections::HashMap;

    struct FixedIndex {
        rows: HashMap<String, i64>,
    }

    impl NaturalKeyIndex for FixedIndex {
        fn find_by_natural_key<'a>(
            &'a self,
            natural_key: &'a str,
        ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>> {
            Box::pin(async move {
                Ok(self.rows.get(natural_key).map(|id| StoredRecord {
                    id: *id,
                    natural_key: Some(natural_key.to_string()),
                    import_source: Some("CONGRESS".to_string()),
                }))
            })
        }

        fn find_by_normalized_name<'a>(
            &'a self,
            _normalized_name: &'a str,
        ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>> {
            Box::pin(async move {
                panic!("duplicate checks must never consult the name fallback")
            })
        }
    }

    fn member(bioguide_id: &str) -> CongressMember {
        CongressMember {
            bioguide_id: bioguide_id.to_string(),
            name: Some("Test Member".to_string()),
            party_name: None,
            state: None,
            district: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn annotates_existing_candidates_with_exact_confidence() {
        let index = FixedIndex {
            rows: HashMap::from([("BIOGUIDE:B000944".to_string(), 17)]),
        };
        let service = DuplicateService::new(index);

        let annotated = service
            .annotate(vec![member("B000944"), member("X999999")])
            .await
            .expect("annotation should succeed");

        assert_eq!(annotated[0].existing_id, Some(17));
        assert_eq!(annotated[0].confidence, MatchConfidence::Exact);
        assert_eq!(annotated[1].existing_id, None);
        assert_eq!(annotated[1].confidence, MatchConfidence::None);
    }

    #[tokio::test]
    async fn blank_keys_annotate_as_no_match_without_lookup() {
        let index = FixedIndex {
            rows: HashMap::new(),
        };
        let service = DuplicateService::new(index);

        let existing = service
            .check_duplicate(&member("   "))
            .await
            .expect("check should succeed");
        assert_eq!(existing, None);
    }

    #[test]
    fn legislator_key_comes_from_bioguide() {
        let mut record = LegislatorRecord::default();
        assert_eq!(record.natural_key(), None);

        record.id.bioguide = Some("O000172".to_string());
        assert_eq!(record.natural_key().as_deref(), Some("BIOGUIDE:O000172"));
    }
}
