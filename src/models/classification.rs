use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Document classes recognized by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentClass {
    DriversLicense,
    BankStatement,
    Invoice,
    Unknown,
}

/// Classifier confidence, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp `value` into `[0, 1]`. NaN becomes zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("confidence {value} outside [0, 1]"))
        }
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

/// Confidence a recognized document must exceed to count as valid.
pub const VALID_CONFIDENCE: f64 = 0.8;

/// Outcome of a successful classification, stored on the job as its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub label: DocumentClass,
    pub confidence: Confidence,
    /// Recognized with confidence above [`VALID_CONFIDENCE`].
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub detected_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
}

impl Classification {
    pub fn new(label: DocumentClass, confidence: Confidence) -> Self {
        Self {
            label,
            confidence,
            is_valid: label != DocumentClass::Unknown && confidence.value() > VALID_CONFIDENCE,
            detected_fields: BTreeMap::new(),
            missing_fields: Vec::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(DocumentClass::Unknown, Confidence::new(0.0))
    }
}

/// Format a document was recognized as before extraction.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum DocumentFormat {
    Text,
    Pdf,
    Image(image::ImageFormat),
}

/// Text content extracted from a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub format: DocumentFormat,
    pub text: String,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            format: DocumentFormat::Text,
            text: text.into(),
        }
    }
}
