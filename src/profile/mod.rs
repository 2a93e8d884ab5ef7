//! User profile store
//!
//! A small ordered list of biographical statements. Merging replaces an
//! older fact when an incoming one overlaps most of its words, so "lives
//! in SF" and "lives in San Francisco" never coexist.

use std::collections::HashSet;

use crate::llm::ChatModel;

/// Overlap at or above this replaces the retained fact
pub const OVERLAP_THRESHOLD: f32 = 0.6;

const PROFILE_SYSTEM: &str = "\
You maintain a short biographical profile of the user. From the memory notes \
given, output the user's stable biographical facts, one short statement per \
line. Only include facts about the user (identity, location, work, \
relationships, preferences, possessions). Output the lines and nothing else.";

/// Ordered, deduplicated biographical facts
#[derive(Debug, Default, Clone)]
pub struct ProfileStore {
    facts: Vec<String>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_facts(facts: Vec<String>) -> Self {
        let mut store = Self::new();
        store.merge(facts);
        store
    }

    /// Merge incoming facts. For each, the first retained fact with
    /// word-overlap >= 0.6 is replaced by it; otherwise it is appended.
    pub fn merge(&mut self, incoming: Vec<String>) {
        for fact in incoming {
            let fact = fact.trim().to_string();
            if fact.is_empty() {
                continue;
            }
            match self
                .facts
                .iter()
                .position(|existing| word_overlap(existing, &fact) >= OVERLAP_THRESHOLD)
            {
                Some(i) => self.facts[i] = fact,
                None => self.facts.push(fact),
            }
        }
    }

    pub fn facts(&self) -> &[String] {
        &self.facts
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }

    /// Render the block spliced into the caller's prompt
    pub fn format_block(&self) -> String {
        let mut out = String::from("<user_profile>\n");
        for fact in &self.facts {
            out.push_str("- ");
            out.push_str(fact);
            out.push('\n');
        }
        out.push_str("</user_profile>");
        out
    }
}

/// Shared-word count divided by the smaller word-set size
pub fn word_overlap(a: &str, b: &str) -> f32 {
    let words_a: HashSet<String> = words(a);
    let words_b: HashSet<String> = words(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let shared = words_a.intersection(&words_b).count() as f32;
    shared / words_a.len().min(words_b.len()) as f32
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(String::from)
        .collect()
}

/// Ask the chat model for profile facts over the batch's memory notes.
///
/// Returns parsed candidate facts; an extractor failure yields an empty
/// list so ingest proceeds without a profile update.
pub async fn assemble_profile(chat: &dyn ChatModel, memories_text: &str) -> Vec<String> {
    if memories_text.trim().is_empty() {
        return vec![];
    }

    match chat.complete(PROFILE_SYSTEM, memories_text).await {
        Ok(response) => parse_profile_lines(&response),
        Err(e) => {
            tracing::warn!(error = %e, "profile assembly failed, keeping existing profile");
            vec![]
        }
    }
}

/// Keep lines of 4 to 300 chars after stripping list markers
pub fn parse_profile_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
        })
        .filter(|line| (4..=300).contains(&line.chars().count()))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_overlap() {
        assert!(word_overlap("lives in San Francisco", "lives in SF") >= 0.6);
        assert!(word_overlap("likes tea", "owns a dog") < 0.6);
        assert_eq!(word_overlap("", "anything"), 0.0);
        assert!((word_overlap("same words", "same words") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_replaces_overlapping_fact() {
        let mut store = ProfileStore::new();
        store.merge(vec!["Lives in San Francisco".to_string()]);
        store.merge(vec!["Lives in SF".to_string()]);

        assert_eq!(store.facts(), &["Lives in SF".to_string()]);
    }

    #[test]
    fn test_merge_appends_unrelated_facts() {
        let mut store = ProfileStore::new();
        store.merge(vec![
            "Works as a nurse".to_string(),
            "Has two cats".to_string(),
        ]);
        assert_eq!(store.facts().len(), 2);
    }

    #[test]
    fn test_no_pair_exceeds_threshold() {
        let mut store = ProfileStore::new();
        store.merge(vec![
            "Lives in Berlin".to_string(),
            "Lives in Berlin Germany".to_string(),
            "Enjoys rock climbing".to_string(),
            "Enjoys climbing".to_string(),
        ]);

        let facts = store.facts();
        for (i, a) in facts.iter().enumerate() {
            for b in facts.iter().skip(i + 1) {
                assert!(
                    word_overlap(a, b) < OVERLAP_THRESHOLD,
                    "{:?} and {:?} overlap",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_parse_profile_lines() {
        let lines = parse_profile_lines(
            "- Lives in Berlin\n* Works remotely\n1. Has a dog\nok\n\n# \nx",
        );
        assert_eq!(
            lines,
            vec!["Lives in Berlin", "Works remotely", "Has a dog"]
        );
    }

    #[test]
    fn test_format_block() {
        let store = ProfileStore::from_facts(vec!["Likes tea".to_string()]);
        assert_eq!(store.format_block(), "<user_profile>\n- Likes tea\n</user_profile>");
    }
}
