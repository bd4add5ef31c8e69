use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Flag,
    EnvVar,
    StoredDefault,
    RuntimeInference,
    Prompt,
    ComputedDefault,
}

impl ValueSource {
    pub fn label(&self) -> &'static str {
        match self {
            ValueSource::Flag => "flag",
            ValueSource::EnvVar => "env var",
            ValueSource::StoredDefault => "stored default",
            ValueSource::RuntimeInference => "running stack",
            ValueSource::Prompt => "prompt",
            ValueSource::ComputedDefault => "default",
        }
    }

    /// Whether a value from this source counts as operator-asserted
    pub fn is_explicit(&self) -> bool {
        matches!(self, ValueSource::Flag | ValueSource::Prompt)
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A resolved value tagged with its provenance.
///
/// `source` and `explicit` are set together by the constructors; there is no
/// way to change one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChoice<T> {
    pub value: T,
    pub source: ValueSource,
    pub explicit: bool,
}

impl<T> ValueChoice<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self {
            value,
            explicit: source.is_explicit(),
            source,
        }
    }

    pub fn flag(value: T) -> Self {
        Self::new(value, ValueSource::Flag)
    }

    pub fn env_var(value: T) -> Self {
        Self::new(value, ValueSource::EnvVar)
    }

    pub fn stored(value: T) -> Self {
        Self::new(value, ValueSource::StoredDefault)
    }

    pub fn inferred(value: T) -> Self {
        Self::new(value, ValueSource::RuntimeInference)
    }

    pub fn prompted(value: T) -> Self {
        Self::new(value, ValueSource::Prompt)
    }

    pub fn computed(value: T) -> Self {
        Self::new(value, ValueSource::ComputedDefault)
    }

    /// Operator confirmed this value in a conflict prompt
    pub fn confirmed(self) -> Self {
        let source = match self.source {
            ValueSource::StoredDefault | ValueSource::ComputedDefault | ValueSource::EnvVar => {
                ValueSource::Prompt
            }
            other => other,
        };
        Self {
            value: self.value,
            source,
            explicit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_tracks_source() {
        assert!(ValueChoice::flag("a").explicit);
        assert!(ValueChoice::prompted("a").explicit);
        assert!(!ValueChoice::env_var("a").explicit);
        assert!(!ValueChoice::stored("a").explicit);
        assert!(!ValueChoice::inferred("a").explicit);
        assert!(!ValueChoice::computed("a").explicit);
    }

    #[test]
    fn test_confirmed_stored_value_becomes_prompt() {
        let choice = ValueChoice::stored("dev").confirmed();
        assert_eq!(choice.source, ValueSource::Prompt);
        assert!(choice.explicit);

        let choice = ValueChoice::flag("dev").confirmed();
        assert_eq!(choice.source, ValueSource::Flag);
    }

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&ValueSource::RuntimeInference).unwrap();
        assert_eq!(json, "\"runtime_inference\"");
    }
}
