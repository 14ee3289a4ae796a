use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::{fields, FieldMap, ImportRecord, ParseError};

const ENTITY: &str = "Entity";

/// Streaming parser for Government Manual XML exports.
///
/// Yields one flat [`ImportRecord`] per `<Entity>` element without buffering
/// the document: live state is the open-element path plus the entity under
/// construction, so memory stays bounded by nesting depth regardless of how
/// many entities the export carries.
///
/// Real GOVMAN vintages disagree on details, and this parser accepts both
/// shapes:
/// - `EntityId`/`ParentId`/`SortOrder` as `<Entity>` attributes or as child
///   elements (child elements win when both are present);
/// - mission paragraphs as `MissionStatement/Para` or
///   `MissionStatement/Record/Paragraph`, concatenated with a blank line in
///   source order;
/// - `WebAddress` as a direct child or nested under
///   `Addresses/Address/FooterDetails` (first non-blank wins).
///
/// Entity expansion and DTD fetching are disabled by construction: `DocType`
/// events are discarded and no external resolution is ever attempted.
pub struct GovmanParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Open-element names from the document root down.
    path: Vec<String>,
    /// Index into `path` where the current `<Entity>` element sits.
    entity_start: Option<usize>,
    current: Option<PendingEntity>,
    text: String,
    finished: bool,
}

#[derive(Default)]
struct PendingEntity {
    external_id: Option<String>,
    parent_external_id: Option<String>,
    sort_order: Option<i64>,
    fields: FieldMap,
}

impl PendingEntity {
    fn into_record(self) -> ImportRecord {
        ImportRecord {
            external_id: self.external_id.unwrap_or_default(),
            parent_external_id: self
                .parent_external_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty() && value != "0"),
            sort_order: self.sort_order.unwrap_or(0),
            fields: self.fields,
        }
    }
}

impl<R: BufRead> GovmanParser<R> {
    pub fn new(input: R) -> Self {
        Self {
            reader: Reader::from_reader(input),
            buf: Vec::new(),
            path: Vec::new(),
            entity_start: None,
            current: None,
            text: String::new(),
            finished: false,
        }
    }

    fn malformed(&mut self, err: &quick_xml::Error) -> ParseError {
        self.finished = true;
        ParseError::Malformed {
            position: self.reader.buffer_position() as u64,
            message: err.to_string(),
        }
    }

    fn read_entity_attributes(
        &mut self,
        element: &BytesStart<'_>,
    ) -> Result<PendingEntity, ParseError> {
        let mut pending = PendingEntity::default();

        for attr in element.attributes() {
            let attr = attr.map_err(|err| {
                self.finished = true;
                ParseError::InvalidAttribute {
                    element: ENTITY.to_string(),
                    message: err.to_string(),
                }
            })?;
            let value = attr
                .unescape_value()
                .map_err(|err| {
                    self.finished = true;
                    ParseError::InvalidAttribute {
                        element: ENTITY.to_string(),
                        message: err.to_string(),
                    }
                })?
                .into_owned();

            match attr.key.local_name().as_ref() {
                b"EntityId" => pending.external_id = Some(value),
                b"ParentId" => pending.parent_external_id = Some(value),
                b"SortOrder" => pending.sort_order = value.trim().parse().ok(),
                _ => {}
            }
        }

        Ok(pending)
    }

    fn handle_start(&mut self, element: &BytesStart<'_>) -> Result<(), ParseError> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();

        if name == ENTITY && self.entity_start.is_none() {
            self.entity_start = Some(self.path.len());
            self.current = Some(self.read_entity_attributes(element)?);
        }

        self.path.push(name);
        self.text.clear();
        Ok(())
    }

    /// Consumes the accumulated text for the element that just closed.
    fn handle_field_end(&mut self, closed: &str) {
        let Some(start) = self.entity_start else {
            return;
        };
        let text = std::mem::take(&mut self.text);
        // `closed` has already been popped off `path`, so the slice past the
        // entity element holds the ancestors of the closed element.
        let parents: Vec<&str> = self.path[start + 1..]
            .iter()
            .map(String::as_str)
            .collect();
        let Some(current) = self.current.as_mut() else {
            return;
        };

        match (parents.as_slice(), closed) {
            ([], "EntityId") => {
                if !text.trim().is_empty() {
                    current.external_id = Some(text.trim().to_string());
                }
            }
            ([], "ParentId") => current.parent_external_id = Some(text),
            ([], "SortOrder") => {
                if let Ok(value) = text.trim().parse() {
                    current.sort_order = Some(value);
                }
            }
            ([], "EntityType") => current.fields.set(fields::ENTITY_TYPE, text.trim()),
            ([], "Category") => current.fields.set(fields::CATEGORY, text.trim()),
            ([], "AgencyName") => current.fields.set(fields::AGENCY_NAME, text.trim()),
            ([], "WebAddress") | (["Addresses", "Address", "FooterDetails"], "WebAddress") => {
                if !text.trim().is_empty() {
                    current.fields.set_if_absent(fields::WEB_ADDRESS, text.trim());
                }
            }
            (["MissionStatement"], "Para")
            | (["MissionStatement", "Record"], "Paragraph") => {
                current
                    .fields
                    .append_paragraph(fields::MISSION_STATEMENT, &text);
            }
            _ => {}
        }
    }

    fn next_record(&mut self) -> Option<Result<ImportRecord, ParseError>> {
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => {
                    let err = self.malformed(&err);
                    return Some(Err(err));
                }
            };

            match event {
                Event::Start(element) => {
                    let element = element.to_owned();
                    if let Err(err) = self.handle_start(&element) {
                        return Some(Err(err));
                    }
                }
                Event::Empty(element) => {
                    let element = element.to_owned();
                    if let Err(err) = self.handle_start(&element) {
                        return Some(Err(err));
                    }
                    let closed = self.path.pop().unwrap_or_default();
                    if self.entity_start == Some(self.path.len()) {
                        // Attribute-only entity, e.g. <Entity EntityId="X"/>.
                        self.entity_start = None;
                        if let Some(pending) = self.current.take() {
                            return Some(Ok(pending.into_record()));
                        }
                    } else {
                        self.text.clear();
                        self.handle_field_end(&closed);
                    }
                }
                Event::Text(text) => match text.unescape() {
                    Ok(value) => self.text.push_str(&value),
                    Err(err) => {
                        let err = self.malformed(&err);
                        return Some(Err(err));
                    }
                },
                Event::CData(data) => {
                    self.text
                        .push_str(&String::from_utf8_lossy(data.as_ref()));
                }
                Event::End(element) => {
                    let closed = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                    self.path.pop();
                    if self.entity_start == Some(self.path.len()) && closed == ENTITY {
                        self.entity_start = None;
                        self.text.clear();
                        if let Some(pending) = self.current.take() {
                            return Some(Ok(pending.into_record()));
                        }
                    } else {
                        self.handle_field_end(&closed);
                    }
                }
                // No DTD processing: doctype declarations are discarded and
                // external entities are never resolved.
                Event::DocType(_) | Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
                Event::Eof => {
                    self.finished = true;
                    if let Some(open_element) = self.path.last() {
                        return Some(Err(ParseError::UnexpectedEof {
                            open_element: open_element.clone(),
                        }));
                    }
                    return None;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for GovmanParser<R> {
    type Item = Result<ImportRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.next_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_all(xml: &str) -> Vec<ImportRecord> {
        GovmanParser::new(Cursor::new(xml.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .expect("fixture should parse")
    }

    #[test]
    fn parses_entities_with_child_element_identity() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <GovernmentManual>
              <Entity>
                <EntityId>TEST-1</EntityId>
                <ParentId></ParentId>
                <SortOrder>1</SortOrder>
                <EntityType>Branch</EntityType>
                <Category>Legislative Branch</Category>
                <AgencyName>Test Congress</AgencyName>
                <MissionStatement>
                  <Para>Test mission statement.</Para>
                </MissionStatement>
                <WebAddress>https://test.gov</WebAddress>
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

        let records = parse_all(xml);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].external_id, "TEST-1");
        assert_eq!(records[0].parent_external_id, None);
        assert_eq!(records[0].sort_order, 1);
        assert_eq!(records[0].fields.get(fields::AGENCY_NAME), Some("Test Congress"));
        assert_eq!(
            records[0].fields.get(fields::MISSION_STATEMENT),
            Some("Test mission statement.")
        );
        assert_eq!(
            records[0].fields.get(fields::WEB_ADDRESS),
            Some("https://test.gov")
        );

        assert_eq!(records[1].external_id, "TEST-2");
        assert_eq!(records[1].parent_external_id.as_deref(), Some("TEST-1"));
    }

    #[test]
    fn entity_attributes_are_accepted_and_children_win() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="ATTR-1" ParentId="ATTR-0" SortOrder="9">
                <EntityId>CHILD-1</EntityId>
                <AgencyName>Office of Tests</AgencyName>
              </Entity>
            </GovernmentManual>"#;

        let records = parse_all(xml);
        assert_eq!(records[0].external_id, "CHILD-1");
        assert_eq!(records[0].parent_external_id.as_deref(), Some("ATTR-0"));
        assert_eq!(records[0].sort_order, 9);
    }

    #[test]
    fn parent_id_zero_means_root() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="A" ParentId="0"><AgencyName>A</AgencyName></Entity>
            </GovernmentManual>"#;

        assert_eq!(parse_all(xml)[0].parent_external_id, None);
    }

    #[test]
    fn mission_record_paragraphs_concatenate_in_order() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="M-1">
                <AgencyName>Mission Agency</AgencyName>
                <MissionStatement>
                  <Heading>MISSION</Heading>
                  <Record><Paragraph>First paragraph.</Paragraph></Record>
                  <Record><Paragraph>Second paragraph.</Paragraph></Record>
                </MissionStatement>
              </Entity>
            </GovernmentManual>"#;

        let records = parse_all(xml);
        assert_eq!(
            records[0].fields.get(fields::MISSION_STATEMENT),
            Some("First paragraph.\n\nSecond paragraph.")
        );
    }

    #[test]
    fn nested_footer_web_address_is_used_when_no_direct_child_exists() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="W-1">
                <AgencyName>Web Agency</AgencyName>
                <Addresses>
                  <Address>
                    <FooterDetails><WebAddress>https://nested.gov</WebAddress></FooterDetails>
                  </Address>
                </Addresses>
              </Entity>
            </GovernmentManual>"#;

        let records = parse_all(xml);
        assert_eq!(
            records[0].fields.get(fields::WEB_ADDRESS),
            Some("https://nested.gov")
        );
    }

    #[test]
    fn empty_element_yields_empty_string_field_not_absent() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="E-1">
                <AgencyName>Empty Category Agency</AgencyName>
                <Category/>
              </Entity>
            </GovernmentManual>"#;

        let records = parse_all(xml);
        assert_eq!(records[0].fields.get(fields::CATEGORY), Some(""));
    }

    #[test]
    fn mismatched_close_tag_is_a_terminal_parse_error() {
        let xml = r#"<GovernmentManual>
              <Entity EntityId="X-1"><AgencyName>Broken</AgencyName></Wrong>
            </GovernmentManual>"#;

        let mut parser = GovmanParser::new(Cursor::new(xml.to_string()));
        let mut saw_error = false;
        for item in &mut parser {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "expected a parse error for mismatched tags");
        assert!(parser.next().is_none(), "parser must stop after a fatal error");
    }

    #[test]
    fn truncated_document_reports_unexpected_eof() {
        let xml = r#"<GovernmentManual><Entity EntityId="T-1"><AgencyName>Cut"#;

        let results: Vec<_> = GovmanParser::new(Cursor::new(xml.to_string())).collect();
        let last = results.last().expect("expected at least one result");
        assert!(matches!(last, Err(ParseError::UnexpectedEof { .. })));
    }

    #[test]
    fn doctype_declarations_are_ignored_not_resolved() {
        let xml = r#"<?xml version="1.0"?>
            <!DOCTYPE GovernmentManual SYSTEM "http://example.invalid/evil.dtd">
            <GovernmentManual>
              <Entity EntityId="D-1"><AgencyName>Doctype Agency</AgencyName></Entity>
            </GovernmentManual>"#;

        let records = parse_all(xml);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "D-1");
    }

    #[test]
    fn records_are_yielded_before_the_stream_is_fully_consumed() {
        // A reader that tracks how far parsing has advanced. Pulling the first
        // record out of a two-entity document must not consume the whole input.
        struct CountingReader {
            data: Vec<u8>,
            pos: usize,
        }

        impl std::io::Read for CountingReader {
            fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
                let n = out.len().min(self.data.len() - self.pos).min(64);
                out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let mut xml = String::from("<GovernmentManual>");
        for idx in 0..200 {
            xml.push_str(&format!(
                "<Entity EntityId=\"S-{idx}\"><AgencyName>Agency {idx}</AgencyName>\
                 <MissionStatement><Para>Filler paragraph for agency {idx}.</Para>\
                 </MissionStatement></Entity>"
            ));
        }
        xml.push_str("</GovernmentManual>");
        let total = xml.len();

        let reader = std::io::BufReader::with_capacity(
            64,
            CountingReader {
                data: xml.into_bytes(),
                pos: 0,
            },
        );
        let mut parser = GovmanParser::new(reader);

        let first = parser
            .next()
            .expect("expected a first record")
            .expect("first record should parse");
        assert_eq!(first.external_id, "S-0");
        assert!(
            parser.reader.buffer_position() < total,
            "first record must be available before the full stream is read"
        );
    }
}
