//! Triple extraction.
//!
//! The pipeline treats extraction as a black box: a sentence goes in, a
//! finite list of possibly incomplete triples comes out.

mod corenlp;

pub use corenlp::{CoreNlpConfig, CoreNlpExtractor};

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// A triple as produced by an extractor. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTriple {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
}

impl RawTriple {
    /// Builds a triple with all three fields present.
    #[must_use]
    pub fn new(subject: &str, relation: &str, object: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            relation: Some(relation.to_string()),
            object: Some(object.to_string()),
        }
    }

    /// Returns the three fields if all are present and non-blank.
    #[must_use]
    pub fn complete(&self) -> Option<Triple<'_>> {
        fn field(value: Option<&String>) -> Option<&str> {
            value.map(String::as_str).filter(|s| !s.trim().is_empty())
        }
        Some(Triple {
            subject: field(self.subject.as_ref())?,
            relation: field(self.relation.as_ref())?,
            object: field(self.object.as_ref())?,
        })
    }
}

/// A triple with every field present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple<'a> {
    pub subject: &'a str,
    pub relation: &'a str,
    pub object: &'a str,
}

/// Sentence-to-triples extractor.
pub trait TripleExtractor: Send + Sync {
    /// Extract triples from one sentence. May return an empty list.
    fn extract(&self, sentence: &str) -> Result<Vec<RawTriple>, ExtractionError>;
}
