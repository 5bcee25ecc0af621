//! Context assembly

use crate::model::{Context, RankedResult};
use docsage_common::config::ContextConfig;
use tracing::debug;

/// Joins ranked passages into the grounding text for the answer prompt
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    separator: String,
    max_chars: Option<usize>,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            separator: config.separator.clone(),
            // A zero cap would drop every passage
            max_chars: config.max_chars.filter(|&cap| cap > 0),
        }
    }

    /// Concatenate passages in rank order.
    ///
    /// With a character cap, whole passages are added while they fit; the
    /// first one that overflows is cut to the remaining budget and assembly
    /// stops there. The top passage is always included, so a non-empty
    /// ranking never yields an empty context.
    pub fn assemble(&self, ranked: &[RankedResult]) -> Context {
        let Some(max_chars) = self.max_chars else {
            let text = ranked
                .iter()
                .map(|r| r.hit.content.as_str())
                .collect::<Vec<_>>()
                .join(&self.separator);
            return Context::new(text, ranked.len());
        };

        let separator_chars = self.separator.chars().count();
        let mut text = String::new();
        let mut used = 0usize;
        let mut passages = 0usize;

        for result in ranked {
            let mut budget = max_chars.saturating_sub(used);
            if passages > 0 {
                if budget <= separator_chars {
                    break;
                }
                text.push_str(&self.separator);
                used += separator_chars;
                budget -= separator_chars;
            }
            if budget == 0 {
                break;
            }

            let content = result.hit.content.as_str();
            let content_chars = content.chars().count();
            passages += 1;

            if content_chars <= budget {
                text.push_str(content);
                used += content_chars;
            } else {
                text.extend(content.chars().take(budget));
                debug!(rank = result.rank, max_chars, "Context truncated");
                break;
            }
        }

        Context::new(text, passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::hit;

    fn ranked(contents: &[&str]) -> Vec<RankedResult> {
        contents
            .iter()
            .enumerate()
            .map(|(rank, c)| RankedResult {
                hit: hit(&rank.to_string(), c),
                relevance_score: 1.0 - rank as f64 * 0.1,
                rank,
            })
            .collect()
    }

    fn assembler(max_chars: Option<usize>) -> ContextAssembler {
        ContextAssembler::new(&ContextConfig {
            max_chars,
            ..ContextConfig::default()
        })
    }

    #[test]
    fn test_joins_with_separator() {
        let context = assembler(None).assemble(&ranked(&["first", "second", "third"]));
        assert_eq!(context.as_str(), "first\n\n---\n\nsecond\n\n---\n\nthird");
        assert_eq!(context.passage_count(), 3);
    }

    #[test]
    fn test_empty_ranking_gives_empty_context() {
        let context = assembler(None).assemble(&[]);
        assert!(context.is_empty());
        assert_eq!(context.as_str(), "");
    }

    #[test]
    fn test_cap_cuts_overflowing_passage() {
        // "aaaa" + separator (7 chars) + 4 of "bbbbbbbb"
        let context = assembler(Some(15)).assemble(&ranked(&["aaaa", "bbbbbbbb", "cccc"]));
        assert_eq!(context.as_str(), "aaaa\n\n---\n\nbbbb");
        assert_eq!(context.char_count(), 15);
        assert_eq!(context.passage_count(), 2);
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        let context = assembler(Some(3)).assemble(&ranked(&["héllo wörld"]));
        assert_eq!(context.as_str(), "hél");
    }

    #[test]
    fn test_zero_cap_keeps_passages() {
        let ranked = ranked(&["aaaa", "bbbb"]);
        let context = assembler(Some(0)).assemble(&ranked);
        assert!(!context.is_empty());
        assert_eq!(context.passage_count(), 2);
        assert_eq!(context.as_str(), assembler(None).assemble(&ranked).as_str());
    }

    #[test]
    fn test_smallest_cap_keeps_top_passage() {
        let context = assembler(Some(1)).assemble(&ranked(&["aaaa", "bbbb"]));
        assert_eq!(context.as_str(), "a");
        assert_eq!(context.passage_count(), 1);
    }

    #[test]
    fn test_cap_stops_when_only_separator_fits() {
        let context = assembler(Some(8)).assemble(&ranked(&["aaaa", "bbbb"]));
        assert_eq!(context.as_str(), "aaaa");
        assert_eq!(context.passage_count(), 1);
    }
}
