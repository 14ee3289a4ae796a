use chrono::Utc;

use crate::db::models::{NewOrganization, NewStatute, OrganizationPatch, StatutePatch};

use super::matcher::normalize_name;
use super::types::{fields, ImportRecord, RejectReason, SourceKind};

/// Branch of government an organization belongs to. Stored as a text code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernmentBranch {
    Legislative,
    Judicial,
    Executive,
}

impl GovernmentBranch {
    pub fn as_db_str(self) -> &'static str {
        match self {
            GovernmentBranch::Legislative => "LEGISLATIVE",
            GovernmentBranch::Judicial => "JUDICIAL",
            GovernmentBranch::Executive => "EXECUTIVE",
        }
    }
}

/// Maps a GOVMAN `Category` value to a branch.
///
/// The manual uses long labels like "Legislative Branch"; anything
/// unrecognized defaults to executive, which is where the bulk of the manual
/// lives.
pub fn map_category_to_branch(category: Option<&str>) -> GovernmentBranch {
    let Some(category) = category else {
        return GovernmentBranch::Executive;
    };
    let normalized = category.trim().to_lowercase();
    if normalized.contains("legislative") {
        GovernmentBranch::Legislative
    } else if normalized.contains("judicial") {
        GovernmentBranch::Judicial
    } else {
        GovernmentBranch::Executive
    }
}

/// Organizational form, from the GOVMAN `EntityType` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationType {
    Branch,
    Department,
    IndependentAgency,
    Bureau,
    Commission,
    Board,
    Office,
}

impl OrganizationType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            OrganizationType::Branch => "BRANCH",
            OrganizationType::Department => "DEPARTMENT",
            OrganizationType::IndependentAgency => "INDEPENDENT_AGENCY",
            OrganizationType::Bureau => "BUREAU",
            OrganizationType::Commission => "COMMISSION",
            OrganizationType::Board => "BOARD",
            OrganizationType::Office => "OFFICE",
        }
    }
}

pub fn map_entity_type(entity_type: Option<&str>) -> OrganizationType {
    let Some(entity_type) = entity_type else {
        return OrganizationType::Office;
    };
    match entity_type.trim().to_lowercase().as_str() {
        "branch" => OrganizationType::Branch,
        "department" => OrganizationType::Department,
        "agency" => OrganizationType::IndependentAgency,
        "bureau" => OrganizationType::Bureau,
        "commission" => OrganizationType::Commission,
        "board" => OrganizationType::Board,
        _ => OrganizationType::Office,
    }
}

/// Natural key stored for a GOVMAN entity: `GOVMAN:{EntityId}`.
pub fn govman_natural_key(entity_id: &str) -> String {
    format!("{}:{}", SourceKind::Govman.as_str(), entity_id)
}

/// Checks the fields a GOVMAN record cannot be imported without.
pub fn validate_govman(record: &ImportRecord) -> Result<(), RejectReason> {
    if record.external_id.trim().is_empty() {
        return Err(RejectReason::MissingField("EntityId"));
    }
    if record.fields.get_non_blank(fields::AGENCY_NAME).is_none() {
        return Err(RejectReason::MissingField("AgencyName"));
    }
    Ok(())
}

pub fn organization_from_record(record: &ImportRecord) -> NewOrganization {
    let agency_name = record
        .fields
        .get_non_blank(fields::AGENCY_NAME)
        .unwrap_or_default()
        .to_string();
    let branch = map_category_to_branch(record.fields.get_non_blank(fields::CATEGORY));
    let org_type = map_entity_type(record.fields.get_non_blank(fields::ENTITY_TYPE));

    NewOrganization {
        external_id: Some(govman_natural_key(&record.external_id)),
        normalized_name: normalize_name(&agency_name),
        official_name: agency_name,
        branch: branch.as_db_str().to_string(),
        org_type: org_type.as_db_str().to_string(),
        mission_statement: record
            .fields
            .get_non_blank(fields::MISSION_STATEMENT)
            .map(str::to_string),
        website_url: record
            .fields
            .get_non_blank(fields::WEB_ADDRESS)
            .map(str::to_string),
        sort_order: Some(record.sort_order),
        import_source: Some(SourceKind::Govman.as_str().to_string()),
    }
}

/// Update patch for an organization this pipeline already owns.
///
/// Only fields the manual actually carries are refreshed; the official name is
/// left alone so a curated rename survives re-imports.
pub fn organization_patch(record: &ImportRecord) -> OrganizationPatch {
    OrganizationPatch {
        official_name: None,
        normalized_name: None,
        branch: None,
        org_type: None,
        mission_statement: record
            .fields
            .get_non_blank(fields::MISSION_STATEMENT)
            .map(str::to_string),
        website_url: record
            .fields
            .get_non_blank(fields::WEB_ADDRESS)
            .map(str::to_string),
        sort_order: Some(record.sort_order),
        updated_at: Some(Utc::now()),
    }
}

/// Checks the fields a USLM section cannot be imported without.
pub fn validate_uslm(record: &ImportRecord) -> Result<(), RejectReason> {
    if record.external_id.trim().is_empty() {
        return Err(RejectReason::MissingField("identifier"));
    }
    Ok(())
}

pub fn statute_from_record(record: &ImportRecord, release_point: &str) -> NewStatute {
    NewStatute {
        usc_identifier: record.external_id.clone(),
        title_number: record
            .fields
            .get_non_blank(fields::TITLE_NUMBER)
            .and_then(|value| value.parse().ok()),
        title_name: field_string(record, fields::TITLE_NAME),
        chapter_number: field_string(record, fields::CHAPTER_NUMBER),
        chapter_name: field_string(record, fields::CHAPTER_NAME),
        section_number: field_string(record, fields::SECTION_NUMBER),
        heading: field_string(record, fields::HEADING),
        content_text: field_string(record, fields::CONTENT_TEXT),
        content_xml: field_string(record, fields::CONTENT_XML),
        source_credit: field_string(record, fields::SOURCE_CREDIT),
        source_url: build_source_url(&record.external_id),
        release_point: Some(release_point.to_string()),
        import_source: Some(SourceKind::UsCode.as_str().to_string()),
    }
}

/// Update patch for a statute. A new release point supersedes the prior text,
/// so the whole payload refreshes.
pub fn statute_patch(record: &ImportRecord, release_point: &str) -> StatutePatch {
    StatutePatch {
        title_number: record
            .fields
            .get_non_blank(fields::TITLE_NUMBER)
            .and_then(|value| value.parse().ok()),
        title_name: field_string(record, fields::TITLE_NAME),
        chapter_number: field_string(record, fields::CHAPTER_NUMBER),
        chapter_name: field_string(record, fields::CHAPTER_NAME),
        section_number: field_string(record, fields::SECTION_NUMBER),
        heading: field_string(record, fields::HEADING),
        content_text: field_string(record, fields::CONTENT_TEXT),
        content_xml: field_string(record, fields::CONTENT_XML),
        source_credit: field_string(record, fields::SOURCE_CREDIT),
        source_url: build_source_url(&record.external_id),
        release_point: Some(release_point.to_string()),
        import_source: Some(SourceKind::UsCode.as_str().to_string()),
        updated_at: Some(Utc::now()),
    }
}

fn field_string(record: &ImportRecord, name: &str) -> Option<String> {
    record.fields.get_non_blank(name).map(str::to_string)
}

/// Official viewer URL for a section:
/// `/us/usc/t5/s101` -> `.../view.xhtml?req=granuleid:USC-prelim-title5-section101`.
pub fn build_source_url(usc_identifier: &str) -> Option<String> {
    let rest = usc_identifier.strip_prefix("/us/usc/t")?;
    let (title, section) = rest.split_once("/s")?;
    if title.is_empty() || section.is_empty() || !title.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    Some(format!(
        "https://uscode.house.gov/view.xhtml?req=granuleid:USC-prelim-title{title}-section{section}"
    ))
}
