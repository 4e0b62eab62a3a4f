//! Synonym-table canonicalization of entity text.

use std::collections::HashMap;

/// Built-in synonym table: lowercase surface form to canonical form.
pub const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("kids", "child"),
    ("kid", "child"),
    ("baby", "child"),
    ("babies", "child"),
    ("children", "child"),
    ("truck", "car"),
    ("trucks", "car"),
    ("cars", "car"),
];

/// Static word-level synonym table.
///
/// Read-only once built; the pipeline never learns or mutates entries.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    synonyms: HashMap<String, String>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_SYNONYMS.iter().copied())
    }
}

impl Canonicalizer {
    /// Builds a table from `(surface, canonical)` pairs. Surface forms are lowercased.
    pub fn from_pairs<S, C>(pairs: impl IntoIterator<Item = (S, C)>) -> Self
    where
        S: AsRef<str>,
        C: Into<String>,
    {
        let synonyms = pairs
            .into_iter()
            .map(|(surface, canonical)| (surface.as_ref().to_lowercase(), canonical.into()))
            .collect();
        Self { synonyms }
    }

    /// Builds the default table extended (and overridden) by `extra`.
    pub fn with_extra<S, C>(extra: impl IntoIterator<Item = (S, C)>) -> Self
    where
        S: AsRef<str>,
        C: Into<String>,
    {
        let mut table = Self::default();
        for (surface, canonical) in extra {
            table
                .synonyms
                .insert(surface.as_ref().to_lowercase(), canonical.into());
        }
        table
    }

    /// Number of surface forms in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.synonyms.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synonyms.is_empty()
    }

    /// Canonical form of a single word, if the table has one.
    #[must_use]
    pub fn lookup(&self, word: &str) -> Option<&str> {
        self.synonyms.get(&word.to_lowercase()).map(String::as_str)
    }

    /// Replaces every whitespace-separated token by its canonical form.
    ///
    /// Unmatched tokens keep their original case. Tokens are rejoined with
    /// single spaces.
    ///
    /// ```
    /// use captiongraph::Canonicalizer;
    ///
    /// let canon = Canonicalizer::default();
    /// assert_eq!(canon.canonicalize("two kids and a truck"), "two child and a car");
    /// ```
    #[must_use]
    pub fn canonicalize(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|word| self.lookup(word).unwrap_or(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
