use std::time::Duration;

use thiserror::Error;

/// Import pipelines supported by this worker.
///
/// Each kind owns one natural-key scheme, one parser, and one single-flight
/// run slot. The string form doubles as the `import_source` audit tag on every
/// row a pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Govman,
    UsCode,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Govman => "GOVMAN",
            SourceKind::UsCode => "USCODE",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            SourceKind::Govman => 0,
            SourceKind::UsCode => 1,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known field names carried inside [`ImportRecord::fields`].
///
/// Parsers and the entity conversion layer agree on these names; nothing else
/// in the pipeline interprets field contents.
pub mod fields {
    // GOVMAN entity fields.
    pub const ENTITY_TYPE: &str = "entity_type";
    pub const CATEGORY: &str = "category";
    pub const AGENCY_NAME: &str = "agency_name";
    pub const MISSION_STATEMENT: &str = "mission_statement";
    pub const WEB_ADDRESS: &str = "web_address";

    // USLM section fields.
    pub const TITLE_NUMBER: &str = "title_number";
    pub const TITLE_NAME: &str = "title_name";
    pub const CHAPTER_NUMBER: &str = "chapter_number";
    pub const CHAPTER_NAME: &str = "chapter_name";
    pub const SECTION_NUMBER: &str = "section_number";
    pub const HEADING: &str = "heading";
    pub const CONTENT_TEXT: &str = "content_text";
    pub const CONTENT_XML: &str = "content_xml";
    pub const SOURCE_CREDIT: &str = "source_credit";
}

/// Insertion-ordered field map for one parsed record.
///
/// Source documents repeat some elements (mission-statement paragraphs), so
/// this is not a plain key/value map: repeated text appends with a blank-line
/// separator, preserving source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any earlier value under the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(key, _)| key == name) {
            entry.1 = value;
        } else {
            self.entries.push((name.to_string(), value));
        }
    }

    /// Sets a field only when no value exists yet under the same name.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if self.get(name).is_none() {
            self.entries.push((name.to_string(), value.into()));
        }
    }

    /// Appends a text block to a field, joining repeated blocks with one blank
    /// line. Used for multi-paragraph elements like mission statements.
    pub fn append_paragraph(&mut self, name: &str, paragraph: &str) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) if !existing.is_empty() => {
                existing.push_str("\n\n");
                existing.push_str(paragraph);
            }
            Some((_, existing)) => existing.push_str(paragraph),
            None => self.entries.push((name.to_string(), paragraph.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns a field value only when it is present and non-blank.
    pub fn get_non_blank(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flat record envelope produced by the stream parsers.
///
/// One record per source element, immutable once emitted. Hierarchy is carried
/// only as the `parent_external_id` string reference; resolution happens in a
/// later pass over the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Source-assigned identifier, required for matching.
    pub external_id: String,
    /// Absent means root.
    pub parent_external_id: Option<String>,
    /// Deterministic ordering among siblings.
    pub sort_order: i64,
    pub fields: FieldMap,
}

impl ImportRecord {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            parent_external_id: None,
            sort_order: 0,
            fields: FieldMap::new(),
        }
    }
}

/// Why a record was rejected instead of written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// More than one persisted row matched the normalized-name fallback.
    AmbiguousName { candidates: usize },
    /// The single name-fallback candidate belongs to another import source
    /// (or was curated by hand) and must not be overwritten.
    ProtectedRecord { existing_id: i64 },
    /// A record earlier in the same run already claimed this normalized name.
    NameCollisionInRun,
    /// A record earlier in the same run already claimed this natural key.
    DuplicateKeyInRun,
    /// A required field was missing or blank.
    MissingField(&'static str),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::AmbiguousName { candidates } => {
                write!(f, "ambiguous name match ({candidates} existing candidates)")
            }
            RejectReason::ProtectedRecord { existing_id } => write!(
                f,
                "name matches record {existing_id} from another source; refusing to overwrite"
            ),
            RejectReason::NameCollisionInRun => {
                write!(f, "normalized name collides with an earlier record in this run")
            }
            RejectReason::DuplicateKeyInRun => {
                write!(f, "natural key repeats an earlier record in this run")
            }
            RejectReason::MissingField(name) => write!(f, "missing required field {name}"),
        }
    }
}

/// Per-record classification produced by the natural-key matcher.
///
/// Never mutated after creation; the batch writer executes it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    Create,
    UpdateExisting(i64),
    SkipDuplicate(i64),
    Reject(RejectReason),
}

/// Fatal stream-parse failure.
///
/// Any variant aborts the whole run: a malformed document must never produce
/// partial records that look like a successful import.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("unexpected end of document inside <{open_element}>")]
    UnexpectedEof { open_element: String },
    #[error("invalid attribute on <{element}>: {message}")]
    InvalidAttribute { element: String, message: String },
}

/// Normalized persistence failure classes used by batch retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistErrorKind {
    Retryable,
    Fatal,
}

/// Typed persistence failure with human-readable details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistError {
    pub kind: PersistErrorKind,
    pub message: String,
}

impl PersistError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: PersistErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: PersistErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == PersistErrorKind::Retryable
    }
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Configures batch-write retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Configures write batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Records per transaction. Bounds transaction size and lock duration.
    pub max_records: usize,
    /// Upper bound for one batch write attempt, including queue time.
    pub write_timeout: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_records: 100,
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Engine settings shared by every import kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportConfig {
    pub batch_policy: BatchPolicy,
    pub retry_policy: RetryPolicy,
}

/// Caller-facing import failures.
///
/// Per-record problems are not errors at this level: they are accumulated into
/// the run result. Only conditions that prevent or abort a coherent run reach
/// this enum.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("an import for {0} is already running")]
    AlreadyRunning(&'static str),
    #[error("could not open import input: {0}")]
    Input(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_map_preserves_insertion_order() {
        let mut map = FieldMap::new();
        map.set(fields::CATEGORY, "Legislative Branch");
        map.set(fields::AGENCY_NAME, "Test Congress");
        map.set(fields::CATEGORY, "Judicial Branch");

        let names: Vec<&str> = map.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![fields::CATEGORY, fields::AGENCY_NAME]);
        assert_eq!(map.get(fields::CATEGORY), Some("Judicial Branch"));
    }

    #[test]
    fn append_paragraph_joins_with_blank_line() {
        let mut map = FieldMap::new();
        map.append_paragraph(fields::MISSION_STATEMENT, "First paragraph.");
        map.append_paragraph(fields::MISSION_STATEMENT, "  Second paragraph. ");
        map.append_paragraph(fields::MISSION_STATEMENT, "   ");

        assert_eq!(
            map.get(fields::MISSION_STATEMENT),
            Some("First paragraph.\n\nSecond paragraph.")
        );
    }

    #[test]
    fn get_non_blank_filters_whitespace_values() {
        let mut map = FieldMap::new();
        map.set(fields::WEB_ADDRESS, "   ");
        assert_eq!(map.get_non_blank(fields::WEB_ADDRESS), None);

        map.set(fields::WEB_ADDRESS, " https://example.gov ");
        assert_eq!(
            map.get_non_blank(fields::WEB_ADDRESS),
            Some("https://example.gov")
        );
    }
}
