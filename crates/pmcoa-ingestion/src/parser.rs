//! Paragraph extraction from article markup.
//!
//! [`DocumentParser`] is the seam between the pipeline and whatever turns raw
//! markup into paragraphs. [`JatsParser`] handles the JATS XML used by the
//! PMC Open Access subset:
//!
//! - `<article-id pub-id-type="pmid|pmc|pmcid">` in the front matter
//! - one paragraph per outermost `<p>` inside `<body>`
//! - section label = title of the innermost titled `<sec>`
//! - `<xref ref-type="bibr" rid="...">` collected as reference ids

use crate::error::ParseError;
use crate::models::ParagraphRecord;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

/// Turns one raw document into its ordered paragraphs.
pub trait DocumentParser: Send + Sync {
    fn parse_paragraphs(&self, raw: &str) -> Result<Vec<ParagraphRecord>, ParseError>;
}

impl<F> DocumentParser for F
where
    F: Fn(&str) -> Result<Vec<ParagraphRecord>, ParseError> + Send + Sync,
{
    fn parse_paragraphs(&self, raw: &str) -> Result<Vec<ParagraphRecord>, ParseError> {
        self(raw)
    }
}

/// Parser for PMC JATS XML.
#[derive(Debug, Clone, Copy, Default)]
pub struct JatsParser;

impl JatsParser {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentParser for JatsParser {
    fn parse_paragraphs(&self, raw: &str) -> Result<Vec<ParagraphRecord>, ParseError> {
        parse_jats(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IdKind {
    Pmid,
    Pmc,
}

/// A `<p>` being collected.
#[derive(Default)]
struct OpenParagraph {
    depth: usize,
    section: Option<String>,
    text: String,
    reference_ids: Vec<String>,
}

#[derive(Default)]
struct JatsState {
    pmid: Option<i64>,
    pmc: Option<i64>,
    open_id: Option<(IdKind, String)>,
    seen_body: bool,
    body_depth: usize,
    // One entry per open <sec>; `None` until its <title> is read.
    sections: Vec<Option<String>>,
    // Element names, innermost last.
    stack: Vec<Vec<u8>>,
    title: Option<String>,
    paragraph: Option<OpenParagraph>,
    done: Vec<(Option<String>, String, Vec<String>)>,
}

impl JatsState {
    fn current_section(&self) -> Option<String> {
        self.sections.iter().rev().find_map(|s| s.clone())
    }

    fn parent_is(&self, name: &[u8]) -> bool {
        self.stack.last().map(|n| n.as_slice() == name).unwrap_or(false)
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        let name = e.local_name().as_ref().to_vec();

        match name.as_slice() {
            b"article-id" => {
                let kind = match attr(e, "pub-id-type").as_deref() {
                    Some("pmid") => Some(IdKind::Pmid),
                    Some("pmc") | Some("pmcid") => Some(IdKind::Pmc),
                    _ => None,
                };
                self.open_id = kind.map(|k| (k, String::new()));
            }
            b"body" => {
                self.seen_body = true;
                self.body_depth += 1;
            }
            b"sec" if self.body_depth > 0 => self.sections.push(None),
            b"title" if self.body_depth > 0 && self.parent_is(b"sec") && self.paragraph.is_none() => {
                self.title = Some(String::new());
            }
            b"p" if self.body_depth > 0 => match self.paragraph.as_mut() {
                Some(p) => p.depth += 1,
                None => {
                    self.paragraph = Some(OpenParagraph {
                        depth: 1,
                        section: self.current_section(),
                        ..OpenParagraph::default()
                    })
                }
            },
            b"xref" => self.reference(e),
            _ => {}
        }

        self.stack.push(name);
    }

    fn close(&mut self, name: &[u8]) {
        self.stack.pop();

        match name {
            b"article-id" => {
                if let Some((kind, text)) = self.open_id.take() {
                    let value = parse_article_id(&text);
                    match kind {
                        IdKind::Pmid if self.pmid.is_none() => self.pmid = value,
                        IdKind::Pmc if self.pmc.is_none() => self.pmc = value,
                        _ => {}
                    }
                }
            }
            b"body" => self.body_depth = self.body_depth.saturating_sub(1),
            b"sec" if self.body_depth > 0 => {
                self.sections.pop();
            }
            b"title" => {
                if let Some(title) = self.title.take() {
                    let title = normalize_whitespace(&title);
                    if let Some(slot) = self.sections.last_mut() {
                        *slot = (!title.is_empty()).then_some(title);
                    }
                }
            }
            b"p" => {
                if let Some(p) = self.paragraph.as_mut() {
                    p.depth -= 1;
                    if p.depth == 0 {
                        if let Some(p) = self.paragraph.take() {
                            self.done.push((p.section, p.text, p.reference_ids));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Self-closing `<xref/>`, `<body/>` and friends.
    fn empty(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"xref" => self.reference(e),
            b"body" => self.seen_body = true,
            _ => {}
        }
    }

    fn reference(&mut self, e: &BytesStart<'_>) {
        let Some(p) = self.paragraph.as_mut() else {
            return;
        };
        if attr(e, "ref-type").as_deref() != Some("bibr") {
            return;
        }
        if let Some(rid) = attr(e, "rid") {
            p.reference_ids.extend(rid.split_whitespace().map(str::to_string));
        }
    }

    fn text(&mut self, text: &str) {
        if let Some((_, buf)) = self.open_id.as_mut() {
            buf.push_str(text);
        }
        if let Some(buf) = self.title.as_mut() {
            buf.push_str(text);
        }
        if let Some(p) = self.paragraph.as_mut() {
            p.text.push_str(text);
        }
    }

    fn finish(self) -> Result<Vec<ParagraphRecord>, ParseError> {
        if !self.seen_body {
            return Err(ParseError::MissingField("body"));
        }

        let (pmid, pmc) = (self.pmid, self.pmc);
        Ok(self
            .done
            .into_iter()
            .map(|(section, text, reference_ids)| {
                let text = normalize_whitespace(&text);
                ParagraphRecord {
                    pmid,
                    pmc,
                    section,
                    text: (!text.is_empty()).then_some(text),
                    reference_ids,
                }
            })
            .collect())
    }
}

fn parse_jats(xml: &str) -> Result<Vec<ParagraphRecord>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut state = JatsState::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => state.open(e),
            Ok(Event::Empty(ref e)) => state.empty(e),
            Ok(Event::End(ref e)) => state.close(e.local_name().as_ref()),
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned());
                state.text(&text);
            }
            Ok(Event::CData(ref e)) => state.text(&String::from_utf8_lossy(e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    let paragraphs = state.finish()?;
    debug!(n = paragraphs.len(), "Parsed JATS paragraphs");
    Ok(paragraphs)
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `"PMC3148254"`, `"3148254"` -> `3148254`.
fn parse_article_id(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("PMC")
        .or_else(|| trimmed.strip_prefix("pmc"))
        .unwrap_or(trimmed);
    digits.parse().ok()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE article PUBLIC "-//NLM//DTD JATS (Z39.96) Journal Archiving and Interchange DTD v1.0 20120330//EN" "JATS-archivearticle1.dtd">
<article xmlns:xlink="http://www.w3.org/1999/xlink" article-type="research-article">
  <front>
    <article-meta>
      <article-id pub-id-type="pmid">21801404</article-id>
      <article-id pub-id-type="pmc">PMC3148254</article-id>
      <article-id pub-id-type="doi">10.1186/1471-2164-12-380</article-id>
      <title-group><article-title>KRAS signalling</article-title></title-group>
    </article-meta>
  </front>
  <body>
    <p>Preamble outside any section.</p>
    <sec>
      <title>Background</title>
      <p>KRAS is mutated in <italic>many</italic> cancers
         [<xref ref-type="bibr" rid="B1">1</xref>,<xref ref-type="bibr" rid="B2 B3">2-3</xref>].</p>
      <sec>
        <title>History</title>
        <p>First described in 1982<xref ref-type="fig" rid="F1"/>.</p>
      </sec>
      <p>Back in Background &amp; more.</p>
    </sec>
  </body>
  <back>
    <ref-list><ref id="B1"><p>not body text</p></ref></ref-list>
  </back>
</article>"#;

    #[test]
    fn test_ids_are_attached_to_every_paragraph() {
        let paras = JatsParser.parse_paragraphs(ARTICLE).unwrap();
        assert_eq!(paras.len(), 4);
        for p in &paras {
            assert_eq!(p.pmid, Some(21801404));
            assert_eq!(p.pmc, Some(3148254));
        }
    }

    #[test]
    fn test_sections_follow_nesting() {
        let paras = JatsParser.parse_paragraphs(ARTICLE).unwrap();
        let sections: Vec<_> = paras.iter().map(|p| p.section.as_deref()).collect();
        assert_eq!(
            sections,
            vec![None, Some("Background"), Some("History"), Some("Background")]
        );
    }

    #[test]
    fn test_paragraph_text_and_bibliography_refs() {
        let paras = JatsParser.parse_paragraphs(ARTICLE).unwrap();
        assert_eq!(
            paras[1].text.as_deref(),
            Some("KRAS is mutated in many cancers [1,2-3].")
        );
        assert_eq!(paras[1].reference_ids, vec!["B1", "B2", "B3"]);
        // figure xrefs are not citations
        assert!(paras[2].reference_ids.is_empty());
        assert_eq!(paras[3].text.as_deref(), Some("Back in Background & more."));
    }

    #[test]
    fn test_missing_body_is_missing_field() {
        let xml = r#"<article><front><article-meta>
            <article-id pub-id-type="pmc">1</article-id>
        </article-meta></front></article>"#;
        assert!(matches!(
            JatsParser.parse_paragraphs(xml),
            Err(ParseError::MissingField("body"))
        ));
    }

    #[test]
    fn test_self_closing_body_has_no_paragraphs() {
        let xml = r#"<article><front><article-meta>
            <article-id pub-id-type="pmc">PMC77</article-id>
        </article-meta></front><body/></article>"#;
        assert!(JatsParser.parse_paragraphs(xml).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml() {
        let xml = "<article><body><p>unclosed</sec></body></article>";
        assert!(matches!(JatsParser.parse_paragraphs(xml), Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_article_id_parsing() {
        assert_eq!(parse_article_id("PMC12345"), Some(12345));
        assert_eq!(parse_article_id(" 678 "), Some(678));
        assert_eq!(parse_article_id("not-a-number"), None);
    }

    #[test]
    fn test_closures_are_parsers() {
        let parser = |_: &str| -> Result<Vec<ParagraphRecord>, ParseError> {
            Ok(vec![ParagraphRecord::default()])
        };
        assert_eq!(parser.parse_paragraphs("anything").unwrap().len(), 1);
    }
}
