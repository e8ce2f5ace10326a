// src/classify/mod.rs
// Deterministic query classification: intent, clarity, suggested mode

pub mod clarify;

pub use clarify::{ClarificationGenerator, ClarificationQuestion};

use serde::{Deserialize, Serialize};

/// What the user is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Code,
    Explanation,
    Both,
    Location,
    Relationship,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Explanation => "explanation",
            Self::Both => "both",
            Self::Location => "location",
            Self::Relationship => "relationship",
            Self::Unknown => "unknown",
        }
    }
}

/// How well-specified the query is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clarity {
    Clear,
    Ambiguous,
    RequiresContext,
}

impl Clarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Ambiguous => "ambiguous",
            Self::RequiresContext => "requires_context",
        }
    }
}

/// Whether to answer in one shot or open a clarification conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedMode {
    OneShot,
    Conversational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub clarity: Clarity,
    pub confidence: f32,
    pub suggested_mode: SuggestedMode,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ambiguity_reasons: Vec<String>,
}

/// Pronouns that usually have no antecedent inside a single query
const DANGLING_PRONOUNS: &[&str] = &["it", "they", "them", "these", "those"];

/// Demonstratives count only when nothing follows them ("what is this?")
const BARE_DEMONSTRATIVES: &[&str] = &["this", "that"];

const VAGUE_TERMS: &[&str] = &[
    "stuff",
    "thing",
    "things",
    "something",
    "anything",
    "everything",
    "whatever",
    "etc",
];

const CONTEXT_DETERMINERS: &[&str] = &[
    "current", "previous", "earlier", "above", "last", "recent", "before", "other", "same",
];

const LOCATION_MARKERS: &[&str] = &["where", "show", "find", "locate", "list"];

const RELATIONSHIP_MARKERS: &[&str] = &[
    "call",
    "calls",
    "caller",
    "depend",
    "depends",
    "dependency",
    "dependencies",
    "import",
    "imports",
    "relate",
    "related",
    "connect",
    "connected",
    "extends",
    "implements",
];

const EXPLANATION_MARKERS: &[&str] = &["how", "why", "explain", "describe", "understand"];

const CODE_MARKERS: &[&str] = &[
    "class",
    "function",
    "struct",
    "method",
    "implementation",
    "snippet",
    "example",
    "definition",
];

/// Rule-based classifier. The heuristic is deliberately deterministic:
/// identical query text always yields an identical classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier;

impl QueryClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> Classification {
        let tokens = tokenize(query);
        let reasons = ambiguity_reasons(&tokens);

        let (clarity, confidence, suggested_mode) = match reasons.len() {
            0 => (Clarity::Clear, 0.9, SuggestedMode::OneShot),
            1 | 2 => (Clarity::Ambiguous, 0.6, SuggestedMode::Conversational),
            _ => (Clarity::RequiresContext, 0.3, SuggestedMode::Conversational),
        };

        Classification {
            intent: detect_intent(&tokens),
            clarity,
            confidence,
            suggested_mode,
            ambiguity_reasons: reasons,
        }
    }
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn ambiguity_reasons(tokens: &[String]) -> Vec<String> {
    let mut reasons = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if DANGLING_PRONOUNS.contains(&token.as_str()) {
            reasons.push(format!("dangling pronoun '{token}'"));
        } else if BARE_DEMONSTRATIVES.contains(&token.as_str()) && i + 1 == tokens.len() {
            reasons.push(format!("bare demonstrative '{token}'"));
        } else if VAGUE_TERMS.contains(&token.as_str()) {
            reasons.push(format!("vague term '{token}'"));
        } else if CONTEXT_DETERMINERS.contains(&token.as_str()) {
            reasons.push(format!("context-dependent '{token}'"));
        }
    }
    reasons
}

fn detect_intent(tokens: &[String]) -> Intent {
    let has = |markers: &[&str]| tokens.iter().any(|t| markers.contains(&t.as_str()));

    let explanation = has(EXPLANATION_MARKERS);
    let code = has(CODE_MARKERS);

    if has(RELATIONSHIP_MARKERS) {
        Intent::Relationship
    } else if has(LOCATION_MARKERS) {
        Intent::Location
    } else if explanation && code {
        Intent::Both
    } else if code {
        Intent::Code
    } else if explanation {
        Intent::Explanation
    } else {
        Intent::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_query_is_one_shot() {
        let c = QueryClassifier::new().classify("Show me the AuthService class");
        assert_eq!(c.clarity, Clarity::Clear);
        assert_eq!(c.suggested_mode, SuggestedMode::OneShot);
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);
        assert!(c.ambiguity_reasons.is_empty());
    }

    #[test]
    fn test_vague_query_is_ambiguous() {
        let c = QueryClassifier::new().classify("What about the auth thing?");
        assert_eq!(c.clarity, Clarity::Ambiguous);
        assert_eq!(c.suggested_mode, SuggestedMode::Conversational);
        assert!((c.confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(c.ambiguity_reasons.len(), 1);
    }

    #[test]
    fn test_heavily_underspecified_requires_context() {
        let c = QueryClassifier::new().classify("Why does it break the other stuff after the recent change?");
        assert_eq!(c.clarity, Clarity::RequiresContext);
        assert!(c.ambiguity_reasons.len() >= 3);
        assert!((c.confidence - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_relationship_intent() {
        let c = QueryClassifier::new().classify("What calls the PaymentProcessor?");
        assert_eq!(c.intent, Intent::Relationship);
    }

    #[test]
    fn test_explanation_plus_code_is_both() {
        let c = QueryClassifier::new().classify("Explain the retry implementation");
        assert_eq!(c.intent, Intent::Both);
    }

    #[test]
    fn test_unknown_intent() {
        let c = QueryClassifier::new().classify("AuthService");
        assert_eq!(c.intent, Intent::Unknown);
    }

    #[test]
    fn test_trailing_demonstrative_counts() {
        let c = QueryClassifier::new().classify("can you explain this");
        assert!(!c.ambiguity_reasons.is_empty());
    }

    #[test]
    fn test_demonstrative_with_noun_does_not_count() {
        let c = QueryClassifier::new().classify("explain this module's retry logic in synthesize");
        assert!(c.ambiguity_reasons.is_empty());
    }

    #[test]
    fn test_determinism() {
        let classifier = QueryClassifier::new();
        let a = classifier.classify("What about the auth thing?");
        let b = classifier.classify("What about the auth thing?");
        assert_eq!(a.clarity, b.clarity);
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.ambiguity_reasons, b.ambiguity_reasons);
    }
}
