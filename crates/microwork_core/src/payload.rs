//! Versioned payload envelopes for microtask inputs and outputs.
//!
//! Scenario data is opaque to the core, but it never travels as a bare JSON
//! blob: every payload is wrapped in an envelope tagged with the scenario it
//! belongs to and a schema version, validated at the boundary.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of work scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioKind {
    /// Record a spoken rendition of a prompt sentence.
    SpeechData,
    /// Transcribe a previously recorded utterance.
    SpeechTranscription,
    /// Translate a sentence between two languages.
    TextTranslation,
    /// Draw labeled boxes on an image.
    ImageAnnotation,
}

impl ScenarioKind {
    /// Parses a scenario name, failing fast on unknown values.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "SPEECH_DATA" => Ok(Self::SpeechData),
            "SPEECH_TRANSCRIPTION" => Ok(Self::SpeechTranscription),
            "TEXT_TRANSLATION" => Ok(Self::TextTranslation),
            "IMAGE_ANNOTATION" => Ok(Self::ImageAnnotation),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown scenario name: {other}"
            ))),
        }
    }
}

/// A scenario-tagged, versioned JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Scenario this payload belongs to.
    pub scenario: ScenarioKind,
    /// Schema version within the scenario.
    pub version: u32,
    /// Opaque scenario data.
    pub data: Value,
}

impl Payload {
    /// Creates a version-1 payload.
    pub fn new(scenario: ScenarioKind, data: Value) -> Self {
        Self {
            scenario,
            version: 1,
            data,
        }
    }

    /// Validates the envelope at the boundary.
    ///
    /// Data must be a JSON object and the version must be at least 1.
    pub fn validate(&self) -> CoreResult<()> {
        if self.version == 0 {
            return Err(CoreError::Payload("payload version must be >= 1".into()));
        }
        if !self.data.is_object() {
            return Err(CoreError::Payload(format!(
                "payload data for {:?} must be a JSON object",
                self.scenario
            )));
        }
        Ok(())
    }

    /// Canonical string form of the payload data.
    ///
    /// Object keys serialize in sorted order, so two payloads with the same
    /// content produce the same key. Used by response-agreement policies.
    pub fn response_key(&self) -> String {
        // serde_json maps are BTree-backed, so serialization is canonical.
        serde_json::to_string(&self.data).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scenario_names_parse_or_fail_fast() {
        assert_eq!(
            ScenarioKind::from_name("SPEECH_DATA").unwrap(),
            ScenarioKind::SpeechData
        );
        assert!(matches!(
            ScenarioKind::from_name("TELEPATHY"),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn validation_rejects_non_object_data() {
        let good = Payload::new(ScenarioKind::TextTranslation, json!({"sentence": "hello"}));
        good.validate().unwrap();

        let bad = Payload::new(ScenarioKind::TextTranslation, json!("bare string"));
        assert!(matches!(bad.validate(), Err(CoreError::Payload(_))));

        let mut zero = good;
        zero.version = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn response_key_ignores_key_insertion_order() {
        let a = Payload::new(
            ScenarioKind::ImageAnnotation,
            json!({"label": "cat", "box": [1, 2, 3, 4]}),
        );
        let b = Payload::new(
            ScenarioKind::ImageAnnotation,
            json!({"box": [1, 2, 3, 4], "label": "cat"}),
        );
        assert_eq!(a.response_key(), b.response_key());

        let c = Payload::new(
            ScenarioKind::ImageAnnotation,
            json!({"box": [1, 2, 3, 4], "label": "dog"}),
        );
        assert_ne!(a.response_key(), c.response_key());
    }
}
