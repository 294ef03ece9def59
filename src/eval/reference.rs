use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::ScenarioError;

/// Simulated Phase-2 user reply when the reference flow has no second user
/// turn of its own.
pub const DEFAULT_PHASE2_USER: &str = "Yes, that's correct. Can you fix it?";

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^## \d+\.\s*(.+?)\s*$")
        .multi_line(true)
        .build()
        .expect("section header regex")
});

static IDEAL_FLOW: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\*\*Ideal Flow\*\*:")
        .case_insensitive(true)
        .build()
        .expect("ideal flow regex")
});

static AGENT_LINE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(?:Agent|Agent\*\*):\s*(.*)")
        .case_insensitive(true)
        .build()
        .expect("agent line regex")
});

static USER_LINE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(?:User|User\*\*):\s*(.*)")
        .case_insensitive(true)
        .build()
        .expect("user line regex")
});

/// Reference conversation flows parsed from the ideal-responses document.
/// Keyed by the section title up to the first parenthesis, uppercased, so
/// "## 1. LATE (Late Delivery)" is looked up as "LATE".
#[derive(Debug)]
pub struct ReferenceSet {
    flows: HashMap<String, String>,
}

impl ReferenceSet {
    /// Loads the reference document. A document with no parseable sections
    /// is fatal: the semantic evaluator would score nothing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ScenarioError::NotFound(path.to_path_buf())
            } else {
                ScenarioError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let set = Self::parse(&raw);
        if set.flows.is_empty() {
            return Err(ScenarioError::EmptyReference {
                path: path.to_path_buf(),
            });
        }
        Ok(set)
    }

    pub fn parse(document: &str) -> Self {
        let mut flows = HashMap::new();

        let headers: Vec<_> = SECTION_HEADER.captures_iter(document).collect();
        for (index, header) in headers.iter().enumerate() {
            let title = header.get(1).map(|m| m.as_str()).unwrap_or_default();
            let label = title
                .split('(')
                .next()
                .unwrap_or(title)
                .trim()
                .to_uppercase();
            if label.is_empty() {
                continue;
            }

            let body_start = header.get(0).map(|m| m.end()).unwrap_or(0);
            let body_end = headers
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(document.len());
            let body = document[body_start..body_end].trim();

            // Everything after the Ideal Flow marker; the whole section when
            // the marker is absent.
            let flow = match IDEAL_FLOW.find(body) {
                Some(marker) => body[marker.end()..].trim().to_string(),
                None => body.to_string(),
            };
            flows.insert(label, flow);
        }

        Self { flows }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flow(&self, label: &str) -> Option<&str> {
        self.flows.get(&label.to_uppercase()).map(String::as_str)
    }

    /// The reference agent line for a phase: the first agent line for
    /// Phase 1, the second for Phase 2. `None` when the flow has no line
    /// for that phase.
    pub fn ideal_agent_line(&self, label: &str, phase: u8) -> Option<String> {
        let flow = self.flow(label)?;
        let mut lines = AGENT_LINE
            .captures_iter(flow)
            .filter_map(|capture| capture.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|line| !line.is_empty());

        match phase {
            1 => lines.next(),
            2 => lines.nth(1),
            _ => None,
        }
    }

    /// The simulated Phase-2 user turn: the flow's second user line, or the
    /// generic confirmation when the flow has only one.
    pub fn phase2_user_line(&self, label: &str) -> String {
        self.flow(label)
            .and_then(|flow| {
                USER_LINE
                    .captures_iter(flow)
                    .filter_map(|capture| capture.get(1).map(|m| m.as_str().trim().to_string()))
                    .nth(1)
            })
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| DEFAULT_PHASE2_USER.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = "# Ideal Responses

## 1. LATE (Late Delivery)

**Rubric**: empathy first.

**Ideal Flow**:
User: my order is late by 50 mins
Agent: I'm so sorry for the delay. My tracker shows it's out for delivery. Could you confirm how late it is?
User: It's 50 minutes late now.
Agent: Thank you for confirming. A credit for the delay has been issued. Has this resolved your issue?

## 2. MISS (Missing Item)

**Ideal Flow**:
User: missing Chicken Burger
Agent: I'm sorry an item is missing. Which item did you not receive?
";

    #[test]
    fn sections_are_keyed_by_title_before_parenthesis() {
        let set = ReferenceSet::parse(DOCUMENT);
        assert_eq!(set.len(), 2);
        assert!(set.flow("LATE").is_some());
        assert!(set.flow("late").is_some());
        assert!(set.flow("MISS").is_some());
    }

    #[test]
    fn agent_lines_map_to_phases() {
        let set = ReferenceSet::parse(DOCUMENT);
        let phase1 = set.ideal_agent_line("LATE", 1).expect("phase 1");
        assert!(phase1.starts_with("I'm so sorry for the delay"));
        let phase2 = set.ideal_agent_line("LATE", 2).expect("phase 2");
        assert!(phase2.contains("has been issued"));
        // MISS has a single agent line, so Phase 2 has no reference.
        assert!(set.ideal_agent_line("MISS", 2).is_none());
    }

    #[test]
    fn phase2_user_line_falls_back_to_the_generic_confirmation() {
        let set = ReferenceSet::parse(DOCUMENT);
        assert_eq!(set.phase2_user_line("LATE"), "It's 50 minutes late now.");
        assert_eq!(set.phase2_user_line("MISS"), DEFAULT_PHASE2_USER);
        assert_eq!(set.phase2_user_line("NOPE"), DEFAULT_PHASE2_USER);
    }

    #[test]
    fn section_without_flow_marker_uses_the_whole_body() {
        let set = ReferenceSet::parse("## 1. COLD\nAgent: I'm sorry it arrived cold. What did you order?\n");
        assert!(set.ideal_agent_line("COLD", 1).is_some());
    }

    #[test]
    fn empty_document_is_fatal_on_load() {
        let dir = std::env::temp_dir().join("supportbench-reference-test");
        std::fs::create_dir_all(&dir).expect("tempdir");
        let path = dir.join("empty.md");
        std::fs::write(&path, "no sections here").expect("write");
        let err = ReferenceSet::load(&path).unwrap_err();
        assert!(matches!(err, ScenarioError::EmptyReference { .. }));
    }
}
