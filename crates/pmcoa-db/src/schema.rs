//! Record layout for the article collection.
//!
//! One document per article:
//! `{ _id?: string, pmid: int, pmc: int, ref_ids: [string], text: string }`

use serde::{Deserialize, Serialize};

/// Logical database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "Biomedical";

/// Collection (LanceDB table) name used when none is configured.
pub const DEFAULT_COLLECTION: &str = "PuBMED_Central_Open_Access";

/// Stored in `pmid` / `pmc` when the identifier was absent from the article.
pub const MISSING_ID: i64 = -1;

// =============================================================================
// Article Schema
// =============================================================================

/// Canonical article record.
///
/// `id` is the primary key. When it is `None` the store assigns one at
/// insert time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub pmid: i64,
    pub pmc: i64,
    pub ref_ids: Vec<String>,
    pub text: String,
}

impl ArticleRecord {
    /// Copy of this record keyed under `id`.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..self.clone()
        }
    }
}
