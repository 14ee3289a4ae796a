//! End-to-end pipeline tests over an in-memory store with real upsert
//! semantics: parse -> resolve -> match -> batch-write, including re-import
//! idempotence and the cross-source duplicate safety net.

use std::io::{BufRead, Cursor};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use govdata_worker_lib::import_service::matcher::{NaturalKeyIndex, StoredRecord};
use govdata_worker_lib::import_service::result::RunOutcome;
use govdata_worker_lib::import_service::types::{ImportConfig, PersistError};
use govdata_worker_lib::import_service::writer::{
    BatchWriter, ParentLink, PlannedRecord, PlannedWrite, RecordWriteOutcome, WriteOutcome,
};
use govdata_worker_lib::import_service::ImportEngine;

/// One persisted row, shared between organizations and statutes for test
/// purposes: natural key, normalized name, source tag, and parent link are
/// the only columns the pipeline's contracts observe.
#[derive(Debug, Clone)]
struct Row {
    id: i64,
    natural_key: Option<String>,
    normalized_name: Option<String>,
    import_source: Option<String>,
    parent_id: Option<i64>,
    updates: u32,
}

/// Store fake with genuine upsert behavior: unique natural keys, name
/// lookups, and parent linking.
#[derive(Default)]
struct InMemoryStore {
    rows: Mutex<Vec<Row>>,
    next_id: Mutex<i64>,
}

impl InMemoryStore {
    fn seed(&self, natural_key: Option<&str>, name: &str, import_source: Option<&str>) -> i64 {
        let mut next_id = self.next_id.lock().expect("next_id mutex poisoned");
        *next_id += 1;
        let id = *next_id;
        self.rows.lock().expect("rows mutex poisoned").push(Row {
            id,
            natural_key: natural_key.map(str::to_string),
            normalized_name: Some(name.trim().to_lowercase()),
            import_source: import_source.map(str::to_string),
            parent_id: None,
            updates: 0,
        });
        id
    }

    fn rows(&self) -> Vec<Row> {
        self.rows.lock().expect("rows mutex poisoned").clone()
    }

    fn row_by_key(&self, natural_key: &str) -> Option<Row> {
        self.rows()
            .into_iter()
            .find(|row| row.natural_key.as_deref() == Some(natural_key))
    }
}

impl NaturalKeyIndex for InMemoryStore {
    fn find_by_natural_key<'a>(
        &'a self,
        natural_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredRecord>, PersistError>> {
        Box::pin(async move {
            Ok(self.row_by_key(natural_key).map(|row| StoredRecord {
                id: row.id,
                natural_key: row.natural_key,
                import_source: row.import_source,
            }))
        })
    }

    fn find_by_normalized_name<'a>(
        &'a self,
        normalized_name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredRecord>, PersistError>> {
        Box::pin(async move {
            Ok(self
                .rows()
                .into_iter()
                .filter(|row| row.normalized_name.as_deref() == Some(normalized_name))
                .map(|row| StoredRecord {
                    id: row.id,
                    natural_key: row.natural_key,
                    import_source: row.import_source,
                })
                .collect())
        })
    }
}

impl BatchWriter for InMemoryStore {
    fn apply_batch<'a>(
        &'a self,
        batch: &'a [PlannedRecord],
    ) -> BoxFuture<'a, Result<Vec<RecordWriteOutcome>, PersistError>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(batch.len());
            for record in batch {
                let outcome = match &record.write {
                    PlannedWrite::CreateOrganization(row) => self.insert(
                        row.external_id.clone(),
                        Some(row.normalized_name.clone()),
                        row.import_source.clone(),
                    ),
                    PlannedWrite::CreateStatute(row) => self.insert(
                        Some(row.usc_identifier.clone()),
                        None,
                        row.import_source.clone(),
                    ),
                    PlannedWrite::UpdateOrganization { id, .. }
                    | PlannedWrite::UpdateStatute { id, .. } => {
                        let mut rows = self.rows.lock().expect("rows mutex poisoned");
                        if let Some(row) = rows.iter_mut().find(|row| row.id == *id) {
                            row.updates += 1;
                        }
                        WriteOutcome::Updated { id: *id }
                    }
                };
                outcomes.push(RecordWriteOutcome {
                    external_id: record.external_id.clone(),
                    outcome,
                });
            }
            Ok(outcomes)
        })
    }

    fn link_parents<'a>(
        &'a self,
        links: &'a [ParentLink],
    ) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().expect("rows mutex poisoned");
            for link in links {
                if let Some(row) = rows.iter_mut().find(|row| row.id == link.child_id) {
                    row.parent_id = Some(link.parent_id);
                }
            }
            Ok(())
        })
    }
}

impl InMemoryStore {
    fn insert(
        &self,
        natural_key: Option<String>,
        normalized_name: Option<String>,
        import_source: Option<String>,
    ) -> WriteOutcome {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        if let Some(key) = natural_key.as_deref() {
            if rows.iter().any(|row| row.natural_key.as_deref() == Some(key)) {
                return WriteOutcome::LateDuplicate;
            }
        }
        let mut next_id = self.next_id.lock().expect("next_id mutex poisoned");
        *next_id += 1;
        rows.push(Row {
            id: *next_id,
            natural_key,
            normalized_name,
            import_source,
            parent_id: None,
            updates: 0,
        });
        WriteOutcome::Created { id: *next_id }
    }
}

fn engine(store: &Arc<InMemoryStore>) -> ImportEngine<Arc<InMemoryStore>, Arc<InMemoryStore>> {
    ImportEngine::new(store.clone(), store.clone(), ImportConfig::default())
}

fn stream(xml: &str) -> Box<dyn BufRead + Send> {
    Box::new(Cursor::new(xml.as_bytes().to_vec()))
}

const GOVMAN_TWO_ENTITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GovernmentManual>
  <Entity>
    <EntityId>TEST-1</EntityId>
    <ParentId></ParentId>
    <SortOrder>1</SortOrder>
    <EntityType>Branch</EntityType>
    <Category>Legislative Branch</Category>
    <AgencyName>Test Congress</AgencyName>
    <MissionStatement>
      <Para>Legislates for testing purposes.</Para>
    </MissionStatement>
    <WebAddress>https://congress.test.gov</WebAddress>
  </Entity>
  <Entity>
    <EntityId>TEST-2</EntityId>
    <ParentId>TEST-1</ParentId>
    <SortOrder>1</SortOrder>
    <EntityType>Agency</EntityType>
    <Category>Legislative Branch</Category>
    <AgencyName>Test Senate</AgencyName>
  </Entity>
</GovernmentManual>"#;

const USLM_TWO_SECTIONS: &str = r#"<uslm><main>
  <title identifier="/us/usc/t5">
    <num>5</num>
    <heading>GOVERNMENT ORGANIZATION AND EMPLOYEES</heading>
    <chapter identifier="/us/usc/t5/ch1">
      <num>CHAPTER 1</num>
      <heading>ORGANIZATION</heading>
      <section identifier="/us/usc/t5/s101">
        <num>&#167; 101</num>
        <heading>Executive departments</heading>
        <content><p>The Executive departments are:</p></content>
      </section>
      <section identifier="/us/usc/t5/s102">
        <num>&#167; 102</num>
        <heading>Military departments</heading>
        <content><p>The military departments are listed.</p></content>
      </section>
    </chapter>
  </title>
</main></uslm>"#;

#[tokio::test]
async fn govman_happy_path_imports_and_links_hierarchy() {
    let store = Arc::new(InMemoryStore::default());
    let report = engine(&store).run_govman(stream(GOVMAN_TWO_ENTITIES)).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.total, 2);
    assert_eq!(report.imported, 2);
    assert_eq!(report.updated, 0);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.errors, 0);

    let parent = store
        .row_by_key("GOVMAN:TEST-1")
        .expect("TEST-1 should be persisted");
    let child = store
        .row_by_key("GOVMAN:TEST-2")
        .expect("TEST-2 should be persisted");
    assert_eq!(child.parent_id, Some(parent.id));
    assert_eq!(parent.parent_id, None);
}

#[tokio::test]
async fn reimporting_the_same_govman_stream_is_idempotent() {
    let store = Arc::new(InMemoryStore::default());

    let first = engine(&store).run_govman(stream(GOVMAN_TWO_ENTITIES)).await;
    assert_eq!(first.imported, 2);

    let second = engine(&store).run_govman(stream(GOVMAN_TWO_ENTITIES)).await;
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.imported, 0, "no natural key may be created twice");
    assert_eq!(second.updated, 2);
    assert_eq!(store.rows().len(), 2);
}

#[tokio::test]
async fn name_fallback_never_overwrites_records_from_another_source() {
    let store = Arc::new(InMemoryStore::default());
    // Hand-curated row: same name as the incoming entity, no GOVMAN tag.
    let curated_id = store.seed(None, "Test Congress", None);

    let xml = r#"<GovernmentManual>
      <Entity EntityId="TEST-1">
        <AgencyName>Test Congress</AgencyName>
      </Entity>
    </GovernmentManual>"#;
    let report = engine(&store).run_govman(stream(xml)).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.imported, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.failed, 1);
    assert!(report
        .error_details
        .iter()
        .any(|detail| detail.contains("refusing to overwrite")));

    let rows = store.rows();
    assert_eq!(rows.len(), 1, "curated row must remain the only row");
    assert_eq!(rows[0].id, curated_id);
    assert_eq!(rows[0].updates, 0, "curated row must not be touched");
}

#[tokio::test]
async fn cycle_in_parent_chain_is_reported_and_still_imports_records() {
    let store = Arc::new(InMemoryStore::default());
    let xml = r#"<GovernmentManual>
      <Entity EntityId="A"><ParentId>C</ParentId><AgencyName>Agency A</AgencyName></Entity>
      <Entity EntityId="B"><ParentId>A</ParentId><AgencyName>Agency B</AgencyName></Entity>
      <Entity EntityId="C"><ParentId>B</ParentId><AgencyName>Agency C</AgencyName></Entity>
    </GovernmentManual>"#;

    let report = engine(&store).run_govman(stream(xml)).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.imported, 3);
    assert_eq!(report.errors, 1, "exactly one cycle report expected");
    assert!(report.error_details[0].contains("cycle"));

    // The cut record became a root; the other two still chain beneath it.
    let roots = store
        .rows()
        .into_iter()
        .filter(|row| row.parent_id.is_none())
        .count();
    assert_eq!(roots, 1);
}

#[tokio::test]
async fn uscode_reimport_updates_instead_of_creating() {
    let store = Arc::new(InMemoryStore::default());

    let first = engine(&store)
        .run_uscode(stream(USLM_TWO_SECTIONS), "119-12")
        .await;
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(first.total, 2);
    assert_eq!(first.imported, 2);

    let second = engine(&store)
        .run_uscode(stream(USLM_TWO_SECTIONS), "119-13")
        .await;
    assert_eq!(second.imported, 0);
    assert_eq!(second.updated, 2);
    assert_eq!(store.rows().len(), 2);

    let section = store
        .row_by_key("/us/usc/t5/s101")
        .expect("section should be persisted");
    assert_eq!(section.updates, 1);
}

#[tokio::test]
async fn malformed_uslm_fails_the_run_but_keeps_committed_counts() {
    let store = Arc::new(InMemoryStore::default());
    // Batch size 1 forces the first section to commit before the parse error
    // surfaces.
    let config = ImportConfig {
        batch_policy: govdata_worker_lib::import_service::types::BatchPolicy {
            max_records: 1,
            write_timeout: std::time::Duration::from_secs(5),
        },
        ..ImportConfig::default()
    };
    let engine = ImportEngine::new(store.clone(), store.clone(), config);

    let truncated = r#"<uslm><main><title identifier="/us/usc/t5"><num>5</num>
      <section identifier="/us/usc/t5/s101">
        <num>&#167; 101</num><heading>Executive departments</heading>
        <content><p>The Executive departments are:</p></content>
      </section>
      <section identifier="/us/usc/t5/s102"><num>&#167; 102"#;

    let report = engine.run_uscode(stream(truncated), "119-12").await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(report
        .failure_message
        .as_deref()
        .expect("failure message expected")
        .contains("XML parsing failed"));
    // The committed first section stands; failure is not all-or-nothing at
    // the run level.
    assert_eq!(report.imported, 1);
    assert_eq!(store.rows().len(), 1);
}
