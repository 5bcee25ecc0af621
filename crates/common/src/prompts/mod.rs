//! Prompt templates
//!
//! The two model instructions (query expansion and grounded answering) are
//! configuration, so they are parsed once at startup: every `{name}`
//! placeholder must be known and every required one must be present.
//! Rendering is a single pass, so text substituted into a template is
//! never scanned for placeholders again.

use crate::config::PromptsConfig;
use crate::errors::{AppError, Result};
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

/// Default query expansion instruction
pub const DEFAULT_EXPANSION_TEMPLATE: &str = "\
You generate search queries for a technical documentation search engine.
Rewrite the user's question as exactly three search queries, one per line:
the first restates the question exactly,
the second keeps only the essential keywords,
the third rephrases it as a \"how to\" question.
Output only the three queries, without numbering, bullets or commentary.

Question: {question}";

/// Default grounded answer instruction
pub const DEFAULT_ANSWER_TEMPLATE: &str = "\
You are a documentation assistant. Answer the question using only the context below.

Rules:
- Use only information found in the context. Do not rely on prior knowledge.
- If the answer is not in the context, reply exactly: \"{abstain}\"
- When the context contains relevant code examples, show them in your answer.

Context:
{context}

Question: {question}

Answer:";

/// Reply used when the documentation does not cover the question
pub const DEFAULT_ABSTAIN_PHRASE: &str = "I couldn't find that in the provided documentation.";

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// A validated template with named placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: &'static str,
    text: String,
}

impl PromptTemplate {
    /// Parse a template, checking its placeholders against the allowed and
    /// required names.
    pub fn parse(
        name: &'static str,
        text: &str,
        required: &[&str],
        allowed: &[&str],
    ) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(AppError::config(format!("prompt '{}' is empty", name)));
        }

        let found: Vec<&str> = placeholder_pattern()
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        if let Some(unknown) = found.iter().find(|p| !allowed.contains(p)) {
            return Err(AppError::config(format!(
                "prompt '{}' uses unknown placeholder {{{}}}",
                name, unknown
            )));
        }

        if let Some(missing) = required.iter().find(|r| !found.contains(r)) {
            return Err(AppError::config(format!(
                "prompt '{}' is missing placeholder {{{}}}",
                name, missing
            )));
        }

        Ok(Self {
            name,
            text: text.to_string(),
        })
    }

    /// Template name, used in logs and errors
    pub fn name(&self) -> &str {
        self.name
    }

    /// Substitute placeholders. Names without a value render as empty text.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        placeholder_pattern()
            .replace_all(&self.text, |caps: &Captures<'_>| {
                let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                values
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

/// Both pipeline prompts plus the abstain reply
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub expansion: PromptTemplate,
    pub answer: PromptTemplate,
    pub abstain_phrase: String,
}

impl PromptSet {
    /// Build and validate the prompt set from configuration
    pub fn from_config(config: &PromptsConfig) -> Result<Self> {
        let expansion = PromptTemplate::parse(
            "expansion",
            &config.expansion,
            &["question"],
            &["question"],
        )?;
        let answer = PromptTemplate::parse(
            "answer",
            &config.answer,
            &["question", "context"],
            &["question", "context", "abstain"],
        )?;

        let abstain_phrase = config.abstain_phrase.trim().to_string();
        if abstain_phrase.is_empty() {
            return Err(AppError::config("prompts.abstain_phrase must not be empty"));
        }

        Ok(Self {
            expansion,
            answer,
            abstain_phrase,
        })
    }

    pub fn render_expansion(&self, question: &str) -> String {
        self.expansion.render(&[("question", question)])
    }

    pub fn render_answer(&self, question: &str, context: &str) -> String {
        self.answer.render(&[
            ("question", question),
            ("context", context),
            ("abstain", &self.abstain_phrase),
        ])
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::from_config(&PromptsConfig::default()).expect("default prompts are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let prompts = PromptSet::default();
        assert_eq!(prompts.expansion.name(), "expansion");
        assert_eq!(prompts.abstain_phrase, DEFAULT_ABSTAIN_PHRASE);
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = PromptTemplate::parse("answer", "{question} {contxt}", &["question"], &["question", "context"])
            .unwrap_err();
        assert!(err.to_string().contains("{contxt}"));
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let err = PromptTemplate::parse("answer", "Q: {question}", &["question", "context"], &["question", "context"])
            .unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn test_render_answer_includes_all_parts() {
        let prompts = PromptSet::default();
        let rendered = prompts.render_answer("How do I jump?", "Use Rigidbody.AddForce");
        assert!(rendered.contains("Question: How do I jump?"));
        assert!(rendered.contains("Use Rigidbody.AddForce"));
        assert!(rendered.contains(DEFAULT_ABSTAIN_PHRASE));
        assert!(!rendered.contains("{context}"));
    }

    #[test]
    fn test_render_is_single_pass() {
        let template = PromptTemplate::parse("t", "Q={question} C={context}", &[], &["question", "context"]).unwrap();
        let rendered = template.render(&[("question", "what is {context}?"), ("context", "docs")]);
        assert_eq!(rendered, "Q=what is {context}? C=docs");
    }
}
