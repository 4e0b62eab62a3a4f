//! Stanford CoreNLP OpenIE client.
//!
//! Talks to a running CoreNLP server (`java edu.stanford.nlp.pipeline.StanfordCoreNLPServer`)
//! with the `openie` annotator enabled:
//! ```text
//! POST {endpoint}/?properties={"annotators":"...,openie","outputFormat":"json"}
//! body: the raw sentence
//! ```
//! and reads `sentences[].openie[]` from the JSON response.

use std::time::Duration;

use serde::Deserialize;

use super::{RawTriple, TripleExtractor};
use crate::error::ExtractionError;

const ANNOTATORS: &str = "tokenize,ssplit,pos,lemma,depparse,natlog,openie";

/// Connection settings for a CoreNLP server.
#[derive(Debug, Clone)]
pub struct CoreNlpConfig {
    /// Server base URL (default: `http://localhost:9000`).
    pub endpoint: String,
    /// Per-request timeout (default: 30s).
    pub timeout: Duration,
}

impl Default for CoreNlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(default)]
    sentences: Vec<AnnotatedSentence>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedSentence {
    #[serde(default)]
    openie: Vec<RawTriple>,
}

/// Extractor backed by a CoreNLP server. Calls block until the server answers.
pub struct CoreNlpExtractor {
    config: CoreNlpConfig,
    properties: String,
    client: reqwest::blocking::Client,
}

impl CoreNlpExtractor {
    /// Create a client for the given server.
    ///
    /// # Errors
    /// `ExtractionError::Request` if the HTTP client cannot be built.
    pub fn new(config: CoreNlpConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::Request {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let properties = serde_json::json!({
            "annotators": ANNOTATORS,
            "outputFormat": "json",
        })
        .to_string();
        Ok(Self {
            config,
            properties,
            client,
        })
    }

    /// The configured server URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

/// Flattens the triples of every annotated sentence.
fn parse_annotation(body: &str) -> Result<Vec<RawTriple>, ExtractionError> {
    let annotation: Annotation =
        serde_json::from_str(body).map_err(|e| ExtractionError::Decode {
            message: e.to_string(),
        })?;
    Ok(annotation
        .sentences
        .into_iter()
        .flat_map(|s| s.openie)
        .collect())
}

impl TripleExtractor for CoreNlpExtractor {
    fn extract(&self, sentence: &str) -> Result<Vec<RawTriple>, ExtractionError> {
        if sentence.trim().is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.config.endpoint.trim_end_matches('/'))
            .query(&[("properties", self.properties.as_str())])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(sentence.to_string())
            .send()
            .map_err(|e| ExtractionError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| ExtractionError::Request {
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let triples = parse_annotation(&body)?;
        tracing::trace!(sentence, triples = triples.len(), "openie annotation");
        Ok(triples)
    }
}
