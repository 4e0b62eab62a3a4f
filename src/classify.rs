//! Attribute-versus-relationship classification of relation labels.

/// Relation keywords that mark a triple as an entity attribute.
///
/// Order is priority: when a label contains several keywords as substrings,
/// the earliest entry in this list wins.
pub const ATTRIBUTE_KEYWORDS: &[&str] = &[
    "color",
    "colour",
    "size",
    "height",
    "width",
    "age",
    "material",
    "shape",
    "position",
    "movement",
    "action",
    "emotion",
    "expression",
    "interaction",
    "activity",
    "type",
    "direction",
    "surface",
    "distance",
    "category",
    "weather",
    "clothing",
    "object",
    "animal",
];

/// How a triple should be merged into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripleKind {
    /// Set attribute `name` on the subject, valued by the object text.
    Attribute(String),
    /// Directed edge labeled `predicate` from subject to object.
    Relationship(String),
}

/// Keyword-substring classifier for relation labels.
#[derive(Debug, Clone)]
pub struct TripleClassifier {
    keywords: Vec<String>,
}

impl Default for TripleClassifier {
    fn default() -> Self {
        Self::new(ATTRIBUTE_KEYWORDS.iter().copied())
    }
}

impl TripleClassifier {
    /// Builds a classifier with keywords in the given priority order.
    pub fn new<K: AsRef<str>>(keywords: impl IntoIterator<Item = K>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Keywords in priority order.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Classifies a relation label.
    ///
    /// Never fails: a blank label becomes a relationship with an empty
    /// predicate. Callers that cannot store such edges reject blank labels
    /// before classifying.
    ///
    /// ```
    /// use captiongraph::{TripleClassifier, TripleKind};
    ///
    /// let classifier = TripleClassifier::default();
    /// assert_eq!(classifier.classify("has-color"), TripleKind::Attribute("color".into()));
    /// assert_eq!(classifier.classify("eating"), TripleKind::Relationship("EATING".into()));
    /// ```
    #[must_use]
    pub fn classify(&self, relation: &str) -> TripleKind {
        let lowered = relation.to_lowercase();
        self.keywords
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
            .map_or_else(
                || {
                    let words: Vec<&str> = relation.split_whitespace().collect();
                    TripleKind::Relationship(words.join(" ").to_uppercase())
                },
                |kw| TripleKind::Attribute(kw.clone()),
            )
    }
}
