// src/classify/clarify.rs
// Clarification question generation for ambiguous queries

use serde::{Deserialize, Serialize};

use super::{Classification, Intent};

/// Upper bound on questions per round
const MAX_QUESTIONS: usize = 3;

/// Domain terms that get a tailored aspect question
const DOMAIN_TERMS: &[&str] = &[
    "auth", "database", "cache", "api", "deploy", "logging", "search", "config", "payment",
    "queue",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    /// Stable key the answer is collected under
    pub key: String,
    pub question: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub options: Vec<String>,
    pub multiple_choice: bool,
    pub required: bool,
}

/// Deterministic question generator: identical (query, classification)
/// always produces identical questions, required before optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarificationGenerator;

impl ClarificationGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(
        &self,
        query: &str,
        classification: &Classification,
    ) -> Vec<ClarificationQuestion> {
        let mut questions = Vec::new();
        let lowered = query.to_lowercase();

        if let Some(term) = DOMAIN_TERMS.iter().find(|t| lowered.contains(*t)) {
            questions.push(ClarificationQuestion {
                key: "aspect".into(),
                question: format!("Which aspect of {term} are you interested in?"),
                options: vec![
                    "How it works".into(),
                    "Where it is defined".into(),
                    "What depends on it".into(),
                    "Recent changes".into(),
                ],
                multiple_choice: true,
                required: true,
            });
        }

        questions.push(ClarificationQuestion {
            key: "scope".into(),
            question: "What scope should the answer cover?".into(),
            options: vec![
                "A specific file or class".into(),
                "One component".into(),
                "All components".into(),
            ],
            multiple_choice: true,
            required: questions.is_empty(),
        });

        if classification.intent == Intent::Unknown {
            questions.push(ClarificationQuestion {
                key: "goal".into(),
                question: "What are you trying to accomplish?".into(),
                options: Vec::new(),
                multiple_choice: false,
                required: false,
            });
        }

        // Required questions precede optional ones; the sort is stable so
        // generation order is otherwise preserved
        questions.sort_by_key(|q| !q.required);
        questions.truncate(MAX_QUESTIONS);
        questions
    }
}
