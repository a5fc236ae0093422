use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::jobs::error::{PermanentReason, ProcessingError};
use crate::models::classification::{Classification, Confidence, Content, DocumentClass};
use crate::services::rules::{self, DocumentRules};

const INDICATOR_WEIGHT: f64 = 1.0;
const PATTERN_WEIGHT: f64 = 0.5;

/// Assigns a label and confidence to extracted document content.
///
/// Implementations tag their failures as transient or permanent; callers never
/// look at error text to decide whether to retry.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, content: &Content) -> Result<Classification, ProcessingError>;
}

struct CompiledRules {
    class: DocumentClass,
    indicators: Vec<String>,
    fields: Vec<(&'static str, Vec<Regex>)>,
    specific: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
}

impl CompiledRules {
    fn new(rules: &DocumentRules) -> Result<Self, regex::Error> {
        let fields = rules
            .required_fields
            .iter()
            .map(|(name, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| compile(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((*name, compiled))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            class: rules.class,
            indicators: rules
                .type_indicators
                .iter()
                .map(|i| i.to_uppercase())
                .collect(),
            fields,
            specific: rules
                .specific_patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn score(&self, text: &str, upper: &str) -> f64 {
        let indicators = self
            .indicators
            .iter()
            .filter(|indicator| upper.contains(indicator.as_str()))
            .count() as f64;
        let fields = self
            .fields
            .iter()
            .flat_map(|(_, patterns)| patterns)
            .filter(|re| re.is_match(text))
            .count() as f64;
        let specific = self.specific.iter().filter(|re| re.is_match(text)).count() as f64;

        indicators * INDICATOR_WEIGHT + (fields + specific) * PATTERN_WEIGHT
    }

    fn validate(&self, text: &str) -> Classification {
        let mut detected_fields = BTreeMap::new();
        let mut missing_fields = Vec::new();

        for (name, patterns) in &self.fields {
            let value = patterns.iter().find_map(|re| {
                re.captures(text).map(|caps| {
                    caps.get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default()
                })
            });
            match value {
                Some(value) => {
                    detected_fields.insert(name.to_string(), value);
                }
                None => missing_fields.push(name.to_string()),
            }
        }

        let total = self.fields.len().max(1) as f64;
        let found = detected_fields.len() as f64;

        Classification {
            detected_fields,
            missing_fields,
            ..Classification::new(self.class, Confidence::new(found / total))
        }
    }
}

/// Rule-based classifier scoring text against per-class keyword profiles.
///
/// The best-scoring profile labels the document; its confidence is the share
/// of that profile's required fields found in the text. Text matching no
/// profile at all is labelled `unknown` with zero confidence.
pub struct KeywordClassifier {
    profiles: Vec<CompiledRules>,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_rules(rules::ALL)
    }

    pub fn with_rules(rules: &[DocumentRules]) -> Result<Self, regex::Error> {
        let profiles = rules
            .iter()
            .map(CompiledRules::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { profiles })
    }

    /// Score of every profile, in profile order.
    pub fn scores(&self, text: &str) -> Vec<(DocumentClass, f64)> {
        let upper = text.to_uppercase();
        self.profiles
            .iter()
            .map(|p| (p.class, p.score(text, &upper)))
            .collect()
    }

    pub fn classify_text(&self, text: &str) -> Result<Classification, ProcessingError> {
        if text.trim().is_empty() {
            return Err(ProcessingError::permanent(
                PermanentReason::MalformedDocument,
                "no text could be extracted",
            ));
        }

        let upper = text.to_uppercase();
        let mut best: Option<(&CompiledRules, f64)> = None;
        for profile in &self.profiles {
            let score = profile.score(text, &upper);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((profile, score));
            }
        }

        match best {
            Some((profile, score)) if score > 0.0 => {
                tracing::debug!(label = %profile.class, score = score, "Best matching profile");
                Ok(profile.validate(text))
            }
            _ => Ok(Classification::unknown()),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, content: &Content) -> Result<Classification, ProcessingError> {
        self.classify_text(&content.text)
    }
}
