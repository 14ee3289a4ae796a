use std::collections::HashMap;
use std::io::BufRead;

use log::{info, warn};

use super::convert;
use super::govman_parser::GovmanParser;
use super::hierarchy::{self, HierarchyResolution};
use super::matcher::{NaturalKeyIndex, NaturalKeyMatcher};
use super::result::{ImportReport, ImportResult};
use super::types::{fields, ImportConfig, ImportRecord, MatchDecision, ParseError, SourceKind};
use super::uslm_parser::UslmParser;
use super::writer::{self, BatchWriter, ParentLink, PlannedRecord, PlannedWrite};

/// Bounded handoff between the blocking parse stage and the async pipeline.
/// Backpressure here is what keeps a huge document from piling up in memory
/// ahead of the write plane.
const RECORD_CHANNEL_CAPACITY: usize = 256;

/// Runs one import: parse -> resolve -> match -> batch-write.
///
/// The engine is generic over its store seams so the full pipeline can be
/// exercised against in-memory fakes; production wires in the Postgres
/// implementations.
pub struct ImportEngine<I, W>
where
    I: NaturalKeyIndex,
    W: BatchWriter,
{
    index: I,
    writer: W,
    config: ImportConfig,
}

impl<I, W> ImportEngine<I, W>
where
    I: NaturalKeyIndex,
    W: BatchWriter,
{
    pub fn new(index: I, writer: W, config: ImportConfig) -> Self {
        Self {
            index,
            writer,
            config,
        }
    }

    /// Imports one Government Manual XML stream.
    ///
    /// GOVMAN hierarchy resolution is inherently batch-wide (a parent may
    /// appear anywhere in the document), so records are collected before the
    /// two-pass resolve; the parser itself still streams with bounded state.
    pub async fn run_govman(&self, xml: Box<dyn BufRead + Send>) -> ImportReport {
        let mut result = ImportResult::start(SourceKind::Govman);
        info!("starting GOVMAN XML import");

        let (receiver, parse_handle) = spawn_parse_stage(move || GovmanParser::new(xml));
        let mut records = Vec::new();
        let mut parse_failure = None;
        while let Ok(item) = receiver.recv_async().await {
            match item {
                Ok(record) => records.push(record),
                Err(err) => {
                    parse_failure = Some(err);
                    break;
                }
            }
        }
        drop(receiver);
        let _ = parse_handle.await;

        if let Some(err) = parse_failure {
            warn!("GOVMAN XML parse failed: {err}");
            return result.fail(format!("XML parsing failed: {err}"));
        }

        result.total = records.len() as u32;
        info!("parsed {} entities from GOVMAN XML", records.len());

        let resolution = hierarchy::resolve(records);
        for err in &resolution.errors {
            result.add_problem(err.to_string());
        }

        let mut matcher = NaturalKeyMatcher::new(&self.index, SourceKind::Govman.as_str());
        let mut planned = Vec::new();
        for idx in resolution.traversal_order() {
            let record = &resolution.records[idx];

            if let Err(reason) = convert::validate_govman(record) {
                let context = if record.external_id.trim().is_empty() {
                    "null"
                } else {
                    record.external_id.as_str()
                };
                result.add_error(context, reason.to_string());
                continue;
            }

            let natural_key = convert::govman_natural_key(&record.external_id);
            let fallback_name = record.fields.get_non_blank(fields::AGENCY_NAME);
            match matcher.match_record(&natural_key, fallback_name).await {
                Ok(MatchDecision::Create) => planned.push(PlannedRecord {
                    external_id: record.external_id.clone(),
                    write: PlannedWrite::CreateOrganization(convert::organization_from_record(
                        record,
                    )),
                }),
                Ok(MatchDecision::UpdateExisting(id)) => planned.push(PlannedRecord {
                    external_id: record.external_id.clone(),
                    write: PlannedWrite::UpdateOrganization {
                        id,
                        patch: convert::organization_patch(record),
                    },
                }),
                Ok(MatchDecision::SkipDuplicate(_)) => result.skipped += 1,
                Ok(MatchDecision::Reject(reason)) => {
                    result.add_error(&record.external_id, reason.to_string())
                }
                Err(err) => {
                    warn!(
                        "store lookup failed for {}: {}",
                        record.external_id, err.message
                    );
                    result.add_error(&record.external_id, &err.message);
                    return result.fail(format!("store lookup failed: {}", err.message));
                }
            }
        }

        let mut id_map = HashMap::new();
        if let Err(err) =
            writer::apply_in_batches(&self.writer, &planned, &self.config, &mut result, &mut id_map)
                .await
        {
            return result.fail(format!("batch write aborted: {}", err.message));
        }

        let links = plan_parent_links(&resolution, &id_map);
        if !links.is_empty() {
            if let Err(err) = self.writer.link_parents(&links).await {
                result.add_problem(format!("parent linking failed: {}", err.message));
            }
        }

        let report = result.complete();
        info!("{}", report.summary());
        report
    }

    /// Imports one USLM XML stream.
    ///
    /// Sections are flat (no parent references), so this path is fully
    /// streaming: records flow from the parse stage straight into match and
    /// batch-write without ever collecting the document.
    pub async fn run_uscode(&self, xml: Box<dyn BufRead + Send>, release_point: &str) -> ImportReport {
        let mut result = ImportResult::start(SourceKind::UsCode);
        info!("starting US Code import (release point {release_point})");

        let (receiver, parse_handle) = spawn_parse_stage(move || UslmParser::new(xml));
        let mut matcher = NaturalKeyMatcher::new(&self.index, SourceKind::UsCode.as_str());
        let batch_size = self.config.batch_policy.max_records.max(1);
        let mut pending: Vec<PlannedRecord> = Vec::with_capacity(batch_size);
        let mut id_map = HashMap::new();
        let mut failure: Option<String> = None;

        while let Ok(item) = receiver.recv_async().await {
            let record = match item {
                Ok(record) => record,
                Err(err) => {
                    warn!("USLM XML parse failed: {err}");
                    failure = Some(format!("XML parsing failed: {err}"));
                    break;
                }
            };

            result.total += 1;
            if result.total % 1000 == 0 {
                info!("progress: {} sections processed", result.total);
            }

            if let Err(reason) = convert::validate_uslm(&record) {
                result.add_error("unidentified-section", reason.to_string());
                continue;
            }

            match matcher.match_record(&record.external_id, None).await {
                Ok(MatchDecision::Create) => pending.push(PlannedRecord {
                    external_id: record.external_id.clone(),
                    write: PlannedWrite::CreateStatute(convert::statute_from_record(
                        &record,
                        release_point,
                    )),
                }),
                Ok(MatchDecision::UpdateExisting(id)) => pending.push(PlannedRecord {
                    external_id: record.external_id.clone(),
                    write: PlannedWrite::UpdateStatute {
                        id,
                        patch: convert::statute_patch(&record, release_point),
                    },
                }),
                Ok(MatchDecision::SkipDuplicate(_)) => result.skipped += 1,
                Ok(MatchDecision::Reject(reason)) => {
                    result.add_error(&record.external_id, reason.to_string())
                }
                Err(err) => {
                    result.add_error(&record.external_id, &err.message);
                    failure = Some(format!("store lookup failed: {}", err.message));
                    break;
                }
            }

            if pending.len() >= batch_size {
                if let Err(err) = writer::apply_in_batches(
                    &self.writer,
                    &pending,
                    &self.config,
                    &mut result,
                    &mut id_map,
                )
                .await
                {
                    failure = Some(format!("batch write aborted: {}", err.message));
                    // The failed flush already accounted for these records.
                    pending.clear();
                    break;
                }
                pending.clear();
            }
        }
        drop(receiver);
        let _ = parse_handle.await;

        if failure.is_some() {
            // Records matched but never flushed before the abort.
            for record in &pending {
                result.add_error(&record.external_id, "not attempted: run aborted");
            }
        }

        if failure.is_none() && !pending.is_empty() {
            if let Err(err) = writer::apply_in_batches(
                &self.writer,
                &pending,
                &self.config,
                &mut result,
                &mut id_map,
            )
            .await
            {
                failure = Some(format!("batch write aborted: {}", err.message));
            }
        }

        match failure {
            Some(message) => result.fail(message),
            None => {
                let report = result.complete();
                info!("{}", report.summary());
                report
            }
        }
    }
}

/// Runs a parser on a blocking thread, handing records through a bounded
/// channel. The stage stops at the first parse error; a stream parse is not
/// restartable, so there is nothing useful past that point.
fn spawn_parse_stage<F, P>(
    build_parser: F,
) -> (
    flume::Receiver<Result<ImportRecord, ParseError>>,
    tokio::task::JoinHandle<()>,
)
where
    F: FnOnce() -> P + Send + 'static,
    P: Iterator<Item = Result<ImportRecord, ParseError>>,
{
    let (sender, receiver) = flume::bounded(RECORD_CHANNEL_CAPACITY);
    let handle = tokio::task::spawn_blocking(move || {
        for item in build_parser() {
            let stop = item.is_err();
            if sender.send(item).is_err() {
                // Receiver dropped: the run was aborted downstream.
                break;
            }
            if stop {
                break;
            }
        }
    });
    (receiver, handle)
}

fn plan_parent_links(
    resolution: &HierarchyResolution,
    id_map: &HashMap<String, i64>,
) -> Vec<ParentLink> {
    let mut links = Vec::new();
    for node in &resolution.nodes {
        let Some(parent_idx) = node.parent_idx else {
            continue;
        };
        let child = &resolution.records[node.record_idx];
        let parent = &resolution.records[parent_idx];
        // A child or parent that was skipped or rejected has no row id; the
        // link is silently dropped rather than pointed at a stale row.
        let (Some(child_id), Some(parent_id)) = (
            id_map.get(&child.external_id),
            id_map.get(&parent.external_id),
        ) else {
            continue;
        };
        links.push(ParentLink {
            child_id: *child_id,
            parent_id: *parent_id,
        });
    }
    links
}
