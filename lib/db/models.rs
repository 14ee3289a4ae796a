use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{organizations, statutes};

/// Insert model for one government organization row.
///
/// `created_at`/`updated_at` are intentionally omitted so inserts always take
/// the database defaults; `parent_id` is omitted because parent links are
/// wired in a separate pass once row ids exist.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub external_id: Option<String>,
    pub official_name: String,
    pub normalized_name: String,
    pub branch: String,
    pub org_type: String,
    pub mission_statement: Option<String>,
    pub website_url: Option<String>,
    pub sort_order: Option<i64>,
    pub import_source: Option<String>,
}

/// Update model for an existing organization row.
///
/// `None` fields are skipped, so a re-import only refreshes what the source
/// actually carries and never blanks curated data.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = organizations)]
pub struct OrganizationPatch {
    pub official_name: Option<String>,
    pub normalized_name: Option<String>,
    pub branch: Option<String>,
    pub org_type: Option<String>,
    pub mission_statement: Option<String>,
    pub website_url: Option<String>,
    pub sort_order: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert model for one statute section row.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = statutes)]
pub struct NewStatute {
    pub usc_identifier: String,
    pub title_number: Option<i32>,
    pub title_name: Option<String>,
    pub chapter_number: Option<String>,
    pub chapter_name: Option<String>,
    pub section_number: Option<String>,
    pub heading: Option<String>,
    pub content_text: Option<String>,
    pub content_xml: Option<String>,
    pub source_credit: Option<String>,
    pub source_url: Option<String>,
    pub release_point: Option<String>,
    pub import_source: Option<String>,
}

/// Update model for an existing statute row. The whole payload refreshes on
/// every update since a new release point supersedes the prior text.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = statutes)]
pub struct StatutePatch {
    pub title_number: Option<i32>,
    pub title_name: Option<String>,
    pub chapter_number: Option<String>,
    pub chapter_name: Option<String>,
    pub section_number: Option<String>,
    pub heading: Option<String>,
    pub content_text: Option<String>,
    pub content_xml: Option<String>,
    pub source_credit: Option<String>,
    pub source_url: Option<String>,
    pub release_point: Option<String>,
    pub import_source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
