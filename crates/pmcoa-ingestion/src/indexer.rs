//! Turns one raw article into one stored record.
//!
//! `assemble` is pure; [`IndexerResource`] pairs a parser with one store
//! connection and performs the write.

use crate::error::{IndexError, SkipReason};
use crate::models::{IndexedDocument, ParagraphRecord, RawDocument};
use crate::parser::DocumentParser;
use pmcoa_db::{ArticleRecord, DbError, StoreConnection, MISSING_ID};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument};

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // [3], [12], [4-8], each with at most one leading whitespace char
        Regex::new(r"\s?\[\d+\]|\s?\[\d+-\d+\]").unwrap()
    })
}

/// Transliterate to ASCII and drop numeric citation markers.
pub fn clean_text(text: &str) -> String {
    let ascii = deunicode::deunicode(text);
    citation_regex().replace_all(&ascii, "").into_owned()
}

/// `pmc<n>` wins over `pmid<n>`; `None` when neither is known.
pub fn canonical_id(pmid: Option<i64>, pmc: Option<i64>) -> Option<String> {
    pmc.map(|n| format!("pmc{n}"))
        .or_else(|| pmid.map(|n| format!("pmid{n}")))
}

/// Build the stored representation of an article from its paragraphs.
///
/// Only paragraphs with both a section label and body text contribute to
/// `text`; reference ids are kept from every paragraph, in order.
pub fn assemble(paragraphs: &[ParagraphRecord]) -> IndexedDocument {
    let mut pmid = None;
    let mut pmc = None;
    let mut ref_ids = Vec::new();
    let mut full_text = Vec::new();

    for para in paragraphs {
        if pmid.is_none() {
            pmid = para.pmid;
        }
        if pmc.is_none() {
            pmc = para.pmc;
        }

        let section = para.section.as_deref().unwrap_or_default();
        let text = para.text.as_deref().unwrap_or_default();
        // headings alone are not body text
        if !section.is_empty() && !text.is_empty() {
            full_text.push(clean_text(text));
        }

        ref_ids.extend(para.reference_ids.iter().cloned());
    }

    IndexedDocument {
        canonical_id: canonical_id(pmid, pmc),
        pmid: pmid.unwrap_or(MISSING_ID),
        pmc: pmc.unwrap_or(MISSING_ID),
        ref_ids,
        text: full_text.join("\n\n"),
    }
}

/// Long-lived indexer: one store connection plus the document parser.
///
/// Owned by the resource pool; used by one worker at a time.
pub struct IndexerResource {
    slot: usize,
    connection: Box<dyn StoreConnection>,
    parser: Arc<dyn DocumentParser>,
    indexed: u64,
}

impl IndexerResource {
    pub fn new(
        slot: usize,
        connection: Box<dyn StoreConnection>,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        Self {
            slot,
            connection,
            parser,
            indexed: 0,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Documents written through this resource so far.
    pub fn indexed(&self) -> u64 {
        self.indexed
    }

    /// Parse `raw`, assemble its record and insert it.
    ///
    /// Parser failures are [`IndexError::Skip`]; store failures, including a
    /// duplicate key, are [`IndexError::Fatal`].
    #[instrument(skip(self, raw), fields(slot = self.slot, entry = %raw.entry))]
    pub async fn index(&mut self, raw: RawDocument) -> Result<IndexedDocument, IndexError> {
        let parser = self.parser.clone();
        let paragraphs = tokio::task::spawn_blocking(move || parser.parse_paragraphs(&raw.text))
            .await
            .map_err(|e| SkipReason::ParserPanicked(e.to_string()))??;

        let document = assemble(&paragraphs);
        let key = self
            .connection
            .insert_one(&ArticleRecord::from(&document))
            .await?;

        self.indexed += 1;
        debug!(id = %key, pmid = document.pmid, pmc = document.pmc, "Article indexed");
        Ok(document)
    }

    /// Close the underlying store connection.
    pub async fn close(self) -> Result<(), DbError> {
        self.connection.close().await
    }
}
