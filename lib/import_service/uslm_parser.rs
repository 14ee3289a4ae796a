use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::{fields, ImportRecord, ParseError};

/// Streaming parser for USLM (United States Legislative Markup) XML.
///
/// US Code title files run to hundreds of megabytes, so the parser never
/// materializes the document: it tracks the open `title`/`chapter` context and
/// at most one section under construction, yielding one [`ImportRecord`] per
/// `<section>` element in document order.
///
/// USLM structure:
///
/// ```text
/// <uslm>
///   <main>
///     <title identifier="/us/usc/t5">
///       <num>5</num>
///       <heading>GOVERNMENT ORGANIZATION AND EMPLOYEES</heading>
///       <chapter identifier="/us/usc/t5/ch1">
///         <num>CHAPTER 1</num>
///         <heading>ORGANIZATION</heading>
///         <section identifier="/us/usc/t5/s101">
///           <num>§ 101</num>
///           <heading>Executive departments</heading>
///           <content>...</content>
///           <sourceCredit>...</sourceCredit>
///         </section>
///       </chapter>
///     </title>
///   </main>
/// </uslm>
/// ```
///
/// The `num`/`heading` of the enclosing title and chapter are inherited down
/// to every section record. Only the first heading at each ancestor level is
/// captured so notes and amendment headings do not clobber the real one.
///
/// No DTD processing and no external entity resolution ever happens.
pub struct UslmParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    title: AncestorContext,
    chapter: AncestorContext,
    section: Option<PendingSection>,
    text: String,
    /// Depth of the element whose text we are currently collecting, so nested
    /// markup inside e.g. a heading does not end collection early.
    collecting_at: Option<usize>,
    emitted: i64,
    finished: bool,
}

#[derive(Default)]
struct AncestorContext {
    /// Depth at which the element opened; `None` when not inside one.
    open_at: Option<usize>,
    num: Option<String>,
    heading: Option<String>,
}

impl AncestorContext {
    fn reset(&mut self) {
        self.open_at = None;
        self.num = None;
        self.heading = None;
    }
}

#[derive(Default)]
struct PendingSection {
    open_at: usize,
    identifier: String,
    num: Option<String>,
    heading: Option<String>,
    content_text: Option<String>,
    content_xml: Option<String>,
    source_credit: Option<String>,
}

impl<R: BufRead> UslmParser<R> {
    pub fn new(input: R) -> Self {
        Self {
            reader: Reader::from_reader(input),
            buf: Vec::new(),
            depth: 0,
            title: AncestorContext::default(),
            chapter: AncestorContext::default(),
            section: None,
            text: String::new(),
            collecting_at: None,
            emitted: 0,
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

    fn emit_section(&mut self, section: PendingSection) -> ImportRecord {
        let mut record = ImportRecord::new(section.identifier.clone());
        record.sort_order = self.emitted;
        self.emitted += 1;

        let record_fields = &mut record.fields;
        // The identifier is authoritative; the title's own <num> is only a
        // fallback for unusual appendix identifiers.
        let title_number = extract_title_number(&section.identifier).or_else(|| {
            self.title
                .num
                .as_deref()
                .and_then(|num| num.trim().parse().ok())
        });
        if let Some(title_number) = title_number {
            record_fields.set(fields::TITLE_NUMBER, title_number.to_string());
        }
        if let Some(title_name) = &self.title.heading {
            record_fields.set(fields::TITLE_NAME, title_name.clone());
        }
        if let Some(chapter_num) = &self.chapter.num {
            record_fields.set(fields::CHAPTER_NUMBER, clean_chapter_number(chapter_num));
        }
        if let Some(chapter_name) = &self.chapter.heading {
            record_fields.set(fields::CHAPTER_NAME, chapter_name.clone());
        }
        if let Some(num) = &section.num {
            record_fields.set(fields::SECTION_NUMBER, clean_section_number(num));
        }
        if let Some(heading) = &section.heading {
            record_fields.set(fields::HEADING, heading.clone());
        }
        if let Some(content_text) = section.content_text {
            record_fields.set(fields::CONTENT_TEXT, content_text);
        }
        if let Some(content_xml) = section.content_xml {
            record_fields.set(fields::CONTENT_XML, content_xml);
        }
        if let Some(source_credit) = section.source_credit {
            record_fields.set(fields::SOURCE_CREDIT, source_credit);
        }

        record
    }

    /// Reads the subtree of the element that just opened, returning its inner
    /// XML and its flattened text. Consumes events up to the matching end tag.
    fn capture_subtree(&mut self) -> Result<(String, String), ParseError> {
        let mut xml = String::new();
        let mut text = String::new();
        let mut depth = 1usize;

        while depth > 0 {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => {
                    let err = self.malformed(&err);
                    return Err(err);
                }
            };

            match event {
                Event::Start(element) => {
                    depth += 1;
                    push_start_tag(&mut xml, &element, false)?;
                }
                Event::Empty(element) => {
                    push_start_tag(&mut xml, &element, true)?;
                }
                Event::End(element) => {
                    depth -= 1;
                    if depth > 0 {
                        xml.push_str("</");
                        xml.push_str(&String::from_utf8_lossy(element.local_name().as_ref()));
                        xml.push('>');
                    }
                }
                Event::Text(event_text) => match event_text.unescape() {
                    Ok(value) => {
                        xml.push_str(&escape_xml(&value));
                        text.push_str(&value);
                        text.push(' ');
                    }
                    Err(err) => {
                        let err = self.malformed(&err);
                        return Err(err);
                    }
                },
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(data.as_ref()).into_owned();
                    xml.push_str(&escape_xml(&value));
                    text.push_str(&value);
                    text.push(' ');
                }
                Event::DocType(_) | Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
                Event::Eof => {
                    self.finished = true;
                    return Err(ParseError::UnexpectedEof {
                        open_element: "content".to_string(),
                    });
                }
            }
        }

        Ok((xml, normalize_whitespace(&text)))
    }

    fn in_section(&self) -> bool {
        self.section.is_some()
    }

    fn in_chapter(&self) -> bool {
        self.chapter.open_at.is_some()
    }

    fn in_title(&self) -> bool {
        self.title.open_at.is_some()
    }

    fn handle_start(
        &mut self,
        element: &BytesStart<'static>,
        is_empty: bool,
    ) -> Result<(), ParseError> {
        let name = element.local_name().as_ref().to_vec();
        self.depth += 1;

        match name.as_slice() {
            b"title" if !self.in_title() => {
                self.title.open_at = Some(self.depth);
            }
            b"chapter" if self.in_title() && !self.in_chapter() => {
                self.chapter.open_at = Some(self.depth);
            }
            b"section" if !self.in_section() => {
                let identifier = attribute_value(element, b"identifier")?.unwrap_or_default();
                self.section = Some(PendingSection {
                    open_at: self.depth,
                    identifier,
                    ..PendingSection::default()
                });
            }
            b"num" | b"heading" | b"sourceCredit" => {
                self.text.clear();
                self.collecting_at = Some(self.depth);
            }
            b"content" if self.in_section() => {
                // The whole content subtree is consumed here so nested
                // num/heading elements never reach the ancestor tracking. A
                // self-closing <content/> has no subtree to consume; it still
                // yields empty-string fields rather than absent ones.
                let (xml, text) = if is_empty {
                    (String::new(), String::new())
                } else {
                    let captured = self.capture_subtree()?;
                    self.depth -= 1;
                    captured
                };
                if let Some(section) = self.section.as_mut() {
                    if section.content_xml.is_none() {
                        section.content_xml = Some(xml);
                        section.content_text = Some(text);
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn handle_end(&mut self, name: &[u8]) -> Option<ImportRecord> {
        let closing_depth = self.depth;
        self.depth = self.depth.saturating_sub(1);

        if let Some(collect_depth) = self.collecting_at {
            if closing_depth < collect_depth {
                // Defensive: collection element closed by ancestor pop.
                self.collecting_at = None;
            }
        }

        match name {
            b"num" | b"heading" | b"sourceCredit" if self.collecting_at == Some(closing_depth) => {
                self.collecting_at = None;
                let value = normalize_whitespace(&std::mem::take(&mut self.text));
                self.assign_text_field(name, value);
                None
            }
            b"section" => {
                let closes_section = self
                    .section
                    .as_ref()
                    .map(|section| section.open_at == closing_depth)
                    .unwrap_or(false);
                if closes_section {
                    if let Some(section) = self.section.take() {
                        return Some(self.emit_section(section));
                    }
                }
                None
            }
            b"chapter" if self.chapter.open_at == Some(closing_depth) => {
                self.chapter.reset();
                None
            }
            b"title" if self.title.open_at == Some(closing_depth) => {
                self.title.reset();
                None
            }
            _ => None,
        }
    }

    fn assign_text_field(&mut self, name: &[u8], value: String) {
        if let Some(section) = self.section.as_mut() {
            match name {
                b"num" if section.num.is_none() => section.num = Some(value),
                b"heading" if section.heading.is_none() => section.heading = Some(value),
                b"sourceCredit" if section.source_credit.is_none() => {
                    section.source_credit = Some(value)
                }
                _ => {}
            }
            return;
        }

        if self.in_chapter() {
            match name {
                b"num" if self.chapter.num.is_none() => self.chapter.num = Some(value),
                b"heading" if self.chapter.heading.is_none() => {
                    self.chapter.heading = Some(value)
                }
                _ => {}
            }
            return;
        }

        if self.in_title() {
            match name {
                b"num" if self.title.num.is_none() => self.title.num = Some(value),
                b"heading" if self.title.heading.is_none() => self.title.heading = Some(value),
                _ => {}
            }
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
                    if let Err(err) = self.handle_start(&element, false) {
                        return Some(Err(err));
                    }
                }
                Event::Empty(element) => {
                    let element = element.to_owned();
                    if let Err(err) = self.handle_start(&element, true) {
                        return Some(Err(err));
                    }
                    let name = element.local_name().as_ref().to_vec();
                    if let Some(record) = self.handle_end(&name) {
                        return Some(Ok(record));
                    }
                }
                Event::Text(event_text) => match event_text.unescape() {
                    Ok(value) => {
                        if self.collecting_at.is_some() {
                            self.text.push_str(&value);
                        }
                    }
                    Err(err) => {
                        let err = self.malformed(&err);
                        return Some(Err(err));
                    }
                },
                Event::CData(data) => {
                    if self.collecting_at.is_some() {
                        self.text
                            .push_str(&String::from_utf8_lossy(data.as_ref()));
                    }
                }
                Event::End(element) => {
                    let name = element.local_name().as_ref().to_vec();
                    if let Some(record) = self.handle_end(&name) {
                        return Some(Ok(record));
                    }
                }
                Event::DocType(_) | Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
                Event::Eof => {
                    self.finished = true;
                    if self.depth > 0 {
                        return Some(Err(ParseError::UnexpectedEof {
                            open_element: "document".to_string(),
                        }));
                    }
                    return None;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for UslmParser<R> {
    type Item = Result<ImportRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.next_record()
    }
}

fn attribute_value(
    element: &BytesStart<'_>,
    wanted: &[u8],
) -> Result<Option<String>, ParseError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| ParseError::InvalidAttribute {
            element: String::from_utf8_lossy(element.local_name().as_ref()).into_owned(),
            message: err.to_string(),
        })?;
        if attr.key.local_name().as_ref() == wanted {
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::InvalidAttribute {
                    element: String::from_utf8_lossy(element.local_name().as_ref()).into_owned(),
                    message: err.to_string(),
                })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn push_start_tag(
    xml: &mut String,
    element: &BytesStart<'_>,
    self_closing: bool,
) -> Result<(), ParseError> {
    xml.push('<');
    xml.push_str(&String::from_utf8_lossy(element.local_name().as_ref()));
    for attr in element.attributes() {
        let attr = attr.map_err(|err| ParseError::InvalidAttribute {
            element: String::from_utf8_lossy(element.local_name().as_ref()).into_owned(),
            message: err.to_string(),
        })?;
        let value = attr
            .unescape_value()
            .map_err(|err| ParseError::InvalidAttribute {
                element: String::from_utf8_lossy(element.local_name().as_ref()).into_owned(),
                message: err.to_string(),
            })?;
        xml.push(' ');
        xml.push_str(&String::from_utf8_lossy(attr.key.local_name().as_ref()));
        xml.push_str("=\"");
        xml.push_str(&escape_xml(&value));
        xml.push('"');
    }
    if self_closing {
        xml.push_str("/>");
    } else {
        xml.push('>');
    }
    Ok(())
}

/// Extracts the title number from a USC identifier: `/us/usc/t5/s101` -> `5`.
pub(crate) fn extract_title_number(identifier: &str) -> Option<u32> {
    let rest = identifier.strip_prefix("/us/usc/t")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Cleans a section number of its section symbol: `§ 101` -> `101`.
pub(crate) fn clean_section_number(raw: &str) -> String {
    if let Some(idx) = raw.find('§') {
        let rest = raw[idx + '§'.len_utf8()..].trim_start();
        let token: String = rest
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-')
            .collect();
        if !token.is_empty() {
            return token;
        }
    }
    raw.trim().to_string()
}

/// Strips the `CHAPTER` prefix from a raw chapter num: `CHAPTER 1` -> `1`.
pub(crate) fn clean_chapter_number(raw: &str) -> String {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if let Some(rest) = lowered.strip_prefix("chapter") {
        let skip = trimmed.len() - rest.len();
        return trimmed[skip..].trim().trim_end_matches('.').to_string();
    }
    trimmed.trim_end_matches('.').to_string()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <uslm xmlns="http://xml.house.gov/schemas/uslm/1.0">
          <main>
            <title identifier="/us/usc/t5">
              <num>5</num>
              <heading>GOVERNMENT ORGANIZATION AND EMPLOYEES</heading>
              <chapter identifier="/us/usc/t5/ch1">
                <num>CHAPTER 1</num>
                <heading>ORGANIZATION</heading>
                <section identifier="/us/usc/t5/s101">
                  <num>&#167; 101</num>
                  <heading>Executive departments</heading>
                  <content>
                    <p>The Executive departments are:</p>
                    <p>The Department of State.</p>
                  </content>
                  <sourceCredit>Pub. L. 89-554, Sept. 6, 1966, 80 Stat. 378.</sourceCredit>
                </section>
                <section identifier="/us/usc/t5/s102">
                  <num>&#167; 102</num>
                  <heading>Military departments</heading>
                  <content><p>The military departments are listed.</p></content>
                </section>
              </chapter>
            </title>
          </main>
        </uslm>"#;

    fn parse_all(xml: &str) -> Vec<ImportRecord> {
        UslmParser::new(Cursor::new(xml.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .expect("fixture should parse")
    }

    #[test]
    fn parses_sections_with_inherited_title_and_chapter_context() {
        let records = parse_all(SAMPLE);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.external_id, "/us/usc/t5/s101");
        assert_eq!(first.fields.get(fields::TITLE_NUMBER), Some("5"));
        assert_eq!(
            first.fields.get(fields::TITLE_NAME),
            Some("GOVERNMENT ORGANIZATION AND EMPLOYEES")
        );
        assert_eq!(first.fields.get(fields::CHAPTER_NUMBER), Some("1"));
        assert_eq!(first.fields.get(fields::CHAPTER_NAME), Some("ORGANIZATION"));
        assert_eq!(first.fields.get(fields::SECTION_NUMBER), Some("101"));
        assert_eq!(first.fields.get(fields::HEADING), Some("Executive departments"));
        assert!(first
            .fields
            .get(fields::CONTENT_TEXT)
            .expect("content text should be set")
            .contains("The Executive departments are:"));
        assert!(first
            .fields
            .get(fields::CONTENT_XML)
            .expect("content xml should be set")
            .contains("<p>The Executive departments are:</p>"));
        assert_eq!(
            first.fields.get(fields::SOURCE_CREDIT),
            Some("Pub. L. 89-554, Sept. 6, 1966, 80 Stat. 378.")
        );

        assert_eq!(records[1].external_id, "/us/usc/t5/s102");
        assert_eq!(records[1].sort_order, 1);
    }

    #[test]
    fn section_records_preserve_document_order() {
        let records = parse_all(SAMPLE);
        assert_eq!(records[0].sort_order, 0);
        assert_eq!(records[1].sort_order, 1);
    }

    #[test]
    fn nested_nums_inside_content_do_not_clobber_section_num() {
        let xml = r#"<uslm><main><title identifier="/us/usc/t9">
            <num>9</num><heading>ARBITRATION</heading>
            <section identifier="/us/usc/t9/s1">
              <num>&#167; 1</num>
              <heading>Definitions</heading>
              <content>
                <subsection><num>(a)</num><heading>Scope</heading>
                  <p>Maritime transactions defined.</p></subsection>
              </content>
            </section>
          </title></main></uslm>"#;

        let records = parse_all(xml);
        assert_eq!(records[0].fields.get(fields::SECTION_NUMBER), Some("1"));
        assert_eq!(records[0].fields.get(fields::HEADING), Some("Definitions"));
        let content = records[0].fields.get(fields::CONTENT_TEXT).unwrap();
        assert!(content.contains("Maritime transactions defined."));
    }

    #[test]
    fn section_without_identifier_is_emitted_for_downstream_validation() {
        let xml = r#"<uslm><main><title identifier="/us/usc/t1"><num>1</num>
            <section><num>&#167; 9</num><heading>Orphan</heading></section>
          </title></main></uslm>"#;

        let records = parse_all(xml);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "");
    }

    #[test]
    fn malformed_document_is_a_terminal_error() {
        let xml = r#"<uslm><main><title identifier="/us/usc/t5"><num>5</num>"#;

        let results: Vec<_> = UslmParser::new(Cursor::new(xml.to_string())).collect();
        assert!(matches!(
            results.last(),
            Some(Err(ParseError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn title_number_extraction_handles_identifiers() {
        assert_eq!(extract_title_number("/us/usc/t5/s101"), Some(5));
        assert_eq!(extract_title_number("/us/usc/t42/s1983"), Some(42));
        assert_eq!(extract_title_number("/us/cfr/t5"), None);
        assert_eq!(extract_title_number("/us/usc/tX"), None);
    }

    #[test]
    fn section_number_cleaning_strips_symbol() {
        assert_eq!(clean_section_number("§ 101"), "101");
        assert_eq!(clean_section_number("§101a-1"), "101a-1");
        assert_eq!(clean_section_number("101"), "101");
    }

    #[test]
    fn chapter_number_cleaning_strips_prefix() {
        assert_eq!(clean_chapter_number("CHAPTER 1"), "1");
        assert_eq!(clean_chapter_number("Chapter 12A"), "12A");
        assert_eq!(clean_chapter_number("7"), "7");
    }
}
