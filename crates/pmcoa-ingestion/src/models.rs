//! Data models for the ingestion pipeline.

use pmcoa_db::ArticleRecord;
use serde::{Deserialize, Serialize};

/// Decoded text of one archive entry, consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Path of the entry inside its archive (logging only).
    pub entry: String,
    pub text: String,
}

impl RawDocument {
    pub fn new(entry: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            text: text.into(),
        }
    }
}

/// One body paragraph as reported by a [`crate::parser::DocumentParser`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    /// PubMed id of the enclosing article.
    pub pmid: Option<i64>,
    /// PubMed Central id of the enclosing article.
    pub pmc: Option<i64>,
    /// Title of the innermost enclosing section.
    pub section: Option<String>,
    pub text: Option<String>,
    /// `rid`s of bibliography cross-references in this paragraph.
    pub reference_ids: Vec<String>,
}

/// Article ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// `pmc<n>` or `pmid<n>`; `None` lets the store pick a key.
    pub canonical_id: Option<String>,
    /// `-1` when absent.
    pub pmid: i64,
    /// `-1` when absent.
    pub pmc: i64,
    pub ref_ids: Vec<String>,
    pub text: String,
}

impl From<IndexedDocument> for ArticleRecord {
    fn from(doc: IndexedDocument) -> Self {
        ArticleRecord {
            id: doc.canonical_id,
            pmid: doc.pmid,
            pmc: doc.pmc,
            ref_ids: doc.ref_ids,
            text: doc.text,
        }
    }
}

impl From<&IndexedDocument> for ArticleRecord {
    fn from(doc: &IndexedDocument) -> Self {
        doc.clone().into()
    }
}
