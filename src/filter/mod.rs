//! Lexical relevance scoring for war, geopolitical and economic-warfare news.
//!
//! Supports **both Persian and English** message text – most monitored
//! channels post in a mix of both.  Everything here is a pure function over
//! an immutable dictionary: same text in, same result out.
pub mod topic_category;
pub mod topic_terms;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::filter::topic_terms::DEFAULT_TERMS;
use crate::transport::Message;

pub use crate::filter::topic_category::TopicCategory;

// ─────────────────────────── Normalization ───────────────────────────────

/// Zero-width joiners and Arabic-script diacritics carry no meaning for
/// matching and are dropped outright (so `هسته‌ای` == `هستهای`).
fn is_ignorable(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{FEFF}' | '\u{064B}'..='\u{065F}' | '\u{0670}'
    )
}

/// Lower-case, turn punctuation / symbols / whitespace runs into a single
/// space, and trim both ends.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if is_ignorable(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

// ─────────────────────────── Topic model ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTerm {
    pub phrase: String,
    pub weight: f64,
    pub category: TopicCategory,
}

impl TopicTerm {
    pub fn new(phrase: &str, weight: f64, category: TopicCategory) -> Self {
        Self {
            phrase: phrase.to_string(),
            weight,
            category,
        }
    }
}

/// One occurrence of a term in the normalized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermMatch {
    pub phrase: String,
    pub weight: f64,
    pub category: TopicCategory,
    /// Byte offset in the normalized text.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicScore {
    pub score: f64,
    pub matched_terms: Vec<TermMatch>,
    pub category: Option<TopicCategory>,
}

/// Immutable weighted phrase dictionary.
#[derive(Debug, Clone)]
pub struct TopicModel {
    terms: Vec<TopicTerm>,
    /// Categories in the order they are first declared; tie-break order.
    categories: Vec<TopicCategory>,
}

impl TopicModel {
    /// Validate and build a model.  Phrases are normalized the same way as
    /// message text so that punctuation / casing never prevents a match.
    pub fn new(terms: Vec<TopicTerm>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(terms.len());

        for term in terms {
            let phrase = normalize(&term.phrase);
            if phrase.is_empty() {
                return Err(ConfigError::invalid(
                    "topic_terms",
                    format!("phrase {:?} is empty after normalization", term.phrase),
                ));
            }
            if !term.weight.is_finite() {
                return Err(ConfigError::invalid(
                    "topic_terms",
                    format!("phrase {:?} has non-finite weight", term.phrase),
                ));
            }
            if !seen.insert(phrase.clone()) {
                return Err(ConfigError::invalid(
                    "topic_terms",
                    format!("phrase {phrase:?} is declared twice"),
                ));
            }
            normalized.push(TopicTerm { phrase, ..term });
        }

        if normalized.is_empty() {
            return Err(ConfigError::invalid("topic_terms", "no terms configured"));
        }

        Ok(Self::build(normalized))
    }

    /// The bundled Persian/English dictionary.
    pub fn builtin() -> Self {
        let terms = DEFAULT_TERMS
            .iter()
            .flat_map(|&(category, weight, phrases)| {
                phrases
                    .iter()
                    .map(move |p| TopicTerm::new(&normalize(p), weight, category))
            })
            .collect();
        Self::build(terms)
    }

    fn build(terms: Vec<TopicTerm>) -> Self {
        let mut categories: Vec<TopicCategory> = Vec::new();
        for t in &terms {
            if !categories.contains(&t.category) {
                categories.push(t.category);
            }
        }
        Self { terms, categories }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[cfg(test)]
    pub fn terms(&self) -> &[TopicTerm] {
        &self.terms
    }

    /// Score `text` against the dictionary.
    ///
    /// Every non-overlapping occurrence of every phrase counts; matches are
    /// reported in text order (ties at the same offset in declaration order).
    pub fn score(&self, text: &str) -> TopicScore {
        let normalized = normalize(text);

        let mut hits: Vec<(usize, usize)> = Vec::new();
        if !normalized.is_empty() {
            for (idx, term) in self.terms.iter().enumerate() {
                hits.extend(
                    normalized
                        .match_indices(term.phrase.as_str())
                        .map(|(offset, _)| (offset, idx)),
                );
            }
        }
        hits.sort_unstable();

        let matched_terms: Vec<TermMatch> = hits
            .into_iter()
            .map(|(offset, idx)| {
                let term = &self.terms[idx];
                TermMatch {
                    phrase: term.phrase.clone(),
                    weight: term.weight,
                    category: term.category,
                    offset,
                }
            })
            .collect();

        let score = matched_terms.iter().map(|m| m.weight).sum();
        let category = self.dominant_category(&matched_terms);

        TopicScore {
            score,
            matched_terms,
            category,
        }
    }

    /// Category with the highest cumulative weight; first-declared wins ties.
    fn dominant_category(&self, matches: &[TermMatch]) -> Option<TopicCategory> {
        let mut best: Option<(TopicCategory, f64)> = None;
        for &category in &self.categories {
            let mut present = false;
            let mut total = 0.0;
            for m in matches.iter().filter(|m| m.category == category) {
                present = true;
                total += m.weight;
            }
            if !present {
                continue;
            }
            match best {
                Some((_, w)) if total <= w => {}
                _ => best = Some((category, total)),
            }
        }
        best.map(|(c, _)| c)
    }
}

// ─────────────────────────── Classifier ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Relevant,
    Irrelevant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub message_id: i64,
    pub score: f64,
    pub matched_terms: Vec<TermMatch>,
    pub verdict: Verdict,
    pub category: Option<TopicCategory>,
}

impl ClassificationResult {
    pub fn is_relevant(&self) -> bool {
        self.verdict == Verdict::Relevant
    }

    /// Distinct matched phrases, in first-match order.
    pub fn evidence(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for m in &self.matched_terms {
            if !out.contains(&m.phrase.as_str()) {
                out.push(&m.phrase);
            }
        }
        out
    }
}

/// Turns topic scores into a relevance verdict.
pub struct Classifier {
    model: TopicModel,
    threshold: f64,
}

impl Classifier {
    pub fn new(model: TopicModel, threshold: f64) -> Self {
        Self { model, threshold }
    }

    pub fn classify(&self, message: &Message) -> ClassificationResult {
        self.classify_text(message.id, &message.text)
    }

    pub fn classify_text(&self, message_id: i64, text: &str) -> ClassificationResult {
        let TopicScore {
            score,
            matched_terms,
            category,
        } = self.model.score(text);

        let verdict = if !matched_terms.is_empty() && score >= self.threshold {
            Verdict::Relevant
        } else {
            Verdict::Irrelevant
        };

        debug!(
            "Classified message {message_id}: score={score}, threshold={}, matches={}, \
             category={category:?}, verdict={verdict:?}",
            self.threshold,
            matched_terms.len(),
        );

        ClassificationResult {
            message_id,
            score,
            matched_terms,
            verdict,
            category,
        }
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Classifier(terms={}, categories={:?}, threshold={})",
            self.model.len(),
            self.model.categories,
            self.threshold,
        )
    }
}
