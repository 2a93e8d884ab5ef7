//! Lenient parser for the extractor payload
//!
//! The extractor returns line-oriented sections:
//!
//! ```text
//! MEMORIES:
//! <one memory statement per line>
//! ENTITIES:
//! name | type | summary
//! RELATIONSHIPS:
//! source | relation | target | date?
//! ```
//!
//! Lines that fail structural checks are dropped, never fatal.

use once_cell::sync::Lazy;
use regex::Regex;

/// An entity parsed from the extractor payload
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntity {
    pub name: String,
    pub entity_type: String,
    pub summary: String,
}

/// A relationship triple parsed from the extractor payload
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRelationship {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub date: Option<String>,
}

/// Structured output of one extractor call
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Multi-line canonical restatement of the session
    pub memories_text: String,
    pub entities: Vec<ParsedEntity>,
    pub relationships: Vec<ParsedRelationship>,
}

#[derive(PartialEq)]
enum Section {
    Memories,
    Entities,
    Relationships,
    None,
}

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// Parse an extractor payload. Never fails; unusable lines are dropped.
pub fn parse_extraction(payload: &str) -> Extraction {
    let mut out = Extraction::default();
    let mut memory_lines: Vec<&str> = Vec::new();
    let mut section = Section::None;

    for raw in payload.lines() {
        let line = raw.trim();
        match line.to_ascii_lowercase().as_str() {
            "memories:" => {
                section = Section::Memories;
                continue;
            }
            "entities:" => {
                section = Section::Entities;
                continue;
            }
            "relationships:" => {
                section = Section::Relationships;
                continue;
            }
            _ => {}
        }

        if line.is_empty() {
            continue;
        }

        match section {
            Section::Memories => memory_lines.push(line),
            Section::Entities => {
                if let Some(entity) = parse_entity_line(line) {
                    out.entities.push(entity);
                }
            }
            Section::Relationships => {
                if let Some(rel) = parse_relationship_line(line) {
                    out.relationships.push(rel);
                }
            }
            Section::None => {}
        }
    }

    out.memories_text = memory_lines.join("\n");
    out
}

fn parse_entity_line(line: &str) -> Option<ParsedEntity> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 3 || fields[0].is_empty() {
        return None;
    }
    Some(ParsedEntity {
        name: fields[0].to_string(),
        entity_type: fields[1].to_string(),
        summary: fields[2..].join(" | "),
    })
}

fn parse_relationship_line(line: &str) -> Option<ParsedRelationship> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 3 || fields[0].is_empty() || fields[1].is_empty() || fields[2].is_empty() {
        return None;
    }
    let date = fields
        .get(3)
        .filter(|d| DATE_RE.is_match(d))
        .map(|d| d.to_string());
    Some(ParsedRelationship {
        source: fields[0].to_string(),
        relation: fields[1].to_string(),
        target: fields[2].to_string(),
        date,
    })
}

/// Split memories text into fact lines, capturing an optional leading
/// `(YYYY-MM-DD)` event date.
pub fn fact_lines(memories_text: &str) -> Vec<(String, Option<String>)> {
    static EVENT_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\((\d{4}-\d{2}-\d{2})\)\s*(.+)$").expect("valid event regex"));

    memories_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let line = line.trim_start_matches(['-', '*']).trim();
            match EVENT_RE.captures(line) {
                Some(caps) => (caps[2].to_string(), Some(caps[1].to_string())),
                None => (line.to_string(), None),
            }
        })
        .filter(|(content, _)| !content.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "\
MEMORIES:
User lives in Berlin.
User works as a data engineer.
ENTITIES:
Berlin | location | City the user lives in
Acme Corp | organization | User's employer
broken line without pipes
RELATIONSHIPS:
user | lives_in | berlin
user | works_at | acme_corp | 2026-02-23
user | malformed |
";

    #[test]
    fn test_parse_sections() {
        let ex = parse_extraction(PAYLOAD);
        assert_eq!(
            ex.memories_text,
            "User lives in Berlin.\nUser works as a data engineer."
        );
        assert_eq!(ex.entities.len(), 2);
        assert_eq!(ex.entities[0].name, "Berlin");
        assert_eq!(ex.entities[1].entity_type, "organization");
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let ex = parse_extraction(PAYLOAD);
        // "broken line without pipes" and the empty-target triple are gone
        assert_eq!(ex.relationships.len(), 2);
        assert_eq!(ex.relationships[0].relation, "lives_in");
        assert_eq!(ex.relationships[1].date.as_deref(), Some("2026-02-23"));
    }

    #[test]
    fn test_bad_date_ignored() {
        let ex = parse_extraction("RELATIONSHIPS:\na | b | c | not-a-date\n");
        assert_eq!(ex.relationships.len(), 1);
        assert!(ex.relationships[0].date.is_none());
    }

    #[test]
    fn test_empty_payload() {
        let ex = parse_extraction("");
        assert!(ex.memories_text.is_empty());
        assert!(ex.entities.is_empty());
        assert!(ex.relationships.is_empty());
    }

    #[test]
    fn test_fact_lines() {
        let facts = fact_lines("- lives in Berlin\n(2026-01-05) started a new job\n\n* likes tea");
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0], ("lives in Berlin".to_string(), None));
        assert_eq!(
            facts[1],
            ("started a new job".to_string(), Some("2026-01-05".to_string()))
        );
        assert_eq!(facts[2].0, "likes tea");
    }
}
