use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ScenarioError;

/// Issue labels understood by the harness, in menu order.
pub const ISSUE_LABELS: &[&str] = &[
    "LATE", "MISS", "QUALITY", "WRONG", "PAYMENT", "ADDRESS", "COLD", "TRACK",
];

/// Keyword cues for inferring a label from free user text. Ordered: the
/// first label with a matching keyword wins.
const KEYWORD_MAP: &[(&str, &[&str])] = &[
    ("TRACK", &["track", "where", "status"]),
    ("LATE", &["late", "delayed"]),
    ("MISS", &["missing", "didn't get", "did not get"]),
    ("WRONG", &["wrong", "not what i ordered"]),
    ("PAYMENT", &["payment", "charge", "billing"]),
    ("ADDRESS", &["address"]),
    ("COLD", &["cold", "not hot"]),
    ("QUALITY", &["bad", "stale", "quality"]),
];

/// One issue template from the scenario configuration. Immutable once
/// loaded; many orders may reference the same template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub eta: Option<String>,
    /// Phase-2 instructions for this issue, optionally carrying an embedded
    /// `[FEW-SHOT EXAMPLES]` section.
    #[serde(default)]
    pub prompt_suffix: String,
}

fn default_status() -> String {
    "unknown".to_string()
}

impl Default for ScenarioTemplate {
    fn default() -> Self {
        Self {
            status: default_status(),
            items: Vec::new(),
            eta: None,
            prompt_suffix: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct ScenarioStore {
    templates: HashMap<String, ScenarioTemplate>,
    /// Labels in document order; the first one is the safe default.
    labels: Vec<String>,
}

impl ScenarioStore {
    /// Loads the template mapping. Missing or malformed configuration is
    /// fatal: a partial load would leave every downstream component without
    /// the templates it depends on.
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

        let document: serde_yaml::Value =
            serde_yaml::from_str(&raw).map_err(|source| ScenarioError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        // A sequence or scalar document parses as valid YAML but carries no
        // templates; loading it must fail loudly, not yield an empty store.
        let mapping = document
            .as_mapping()
            .cloned()
            .ok_or_else(|| ScenarioError::NotAMapping(path.to_path_buf()))?;

        let mut templates = HashMap::new();
        let mut labels = Vec::new();
        for (key, value) in mapping {
            let label = match key.as_str() {
                Some(label) => label.to_string(),
                None => continue,
            };
            let template: ScenarioTemplate =
                serde_yaml::from_value(value).map_err(|source| ScenarioError::Malformed {
                    path: path.to_path_buf(),
                    source,
                })?;
            labels.push(label.clone());
            templates.insert(label, template);
        }

        info!(count = templates.len(), path = %path.display(), "loaded scenario templates");
        Ok(Self { templates, labels })
    }

    pub fn from_templates(entries: Vec<(String, ScenarioTemplate)>) -> Self {
        let labels = entries.iter().map(|(label, _)| label.clone()).collect();
        let templates = entries.into_iter().collect();
        Self { templates, labels }
    }

    pub fn get(&self, label: &str) -> Option<&ScenarioTemplate> {
        self.templates.get(label)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template for a label, degrading to an empty fallback with a warning
    /// when the label is unknown. Never fails: order creation must not
    /// crash on a label the configuration does not cover.
    pub fn template_or_fallback(&self, label: &str) -> ScenarioTemplate {
        match self.templates.get(label) {
            Some(template) => template.clone(),
            None => {
                warn!(label, "no scenario template for label, using empty fallback");
                ScenarioTemplate::default()
            }
        }
    }

    /// Picks a label for free user text: an explicit label wins, then the
    /// first keyword hit in map order, then the first configured template.
    pub fn resolve_label(&self, user_input: Option<&str>, label: Option<&str>) -> String {
        if let Some(label) = label {
            return label.to_string();
        }

        if let Some(input) = user_input {
            let lowered = input.to_lowercase();
            for (candidate, keywords) in KEYWORD_MAP {
                if keywords.iter().any(|keyword| lowered.contains(keyword)) {
                    return candidate.to_string();
                }
            }
        }

        self.labels
            .first()
            .cloned()
            .unwrap_or_else(|| "QUALITY".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ScenarioStore {
        ScenarioStore::from_templates(vec![
            (
                "LATE".to_string(),
                ScenarioTemplate {
                    status: "out for delivery".to_string(),
                    items: vec!["Paneer Wrap".to_string()],
                    eta: Some("10 minutes".to_string()),
                    prompt_suffix: String::new(),
                },
            ),
            ("MISS".to_string(), ScenarioTemplate::default()),
        ])
    }

    #[test]
    fn explicit_label_wins_over_keywords() {
        let store = store();
        assert_eq!(
            store.resolve_label(Some("my order is late"), Some("MISS")),
            "MISS"
        );
    }

    #[test]
    fn keywords_are_matched_in_priority_order() {
        let store = store();
        // "where" outranks "late" because TRACK comes first in the map.
        assert_eq!(
            store.resolve_label(Some("where is my late order"), None),
            "TRACK"
        );
        assert_eq!(store.resolve_label(Some("it arrived cold"), None), "COLD");
    }

    #[test]
    fn unmatched_input_falls_back_to_first_template() {
        let store = store();
        assert_eq!(store.resolve_label(Some("hello there"), None), "LATE");
        assert_eq!(store.resolve_label(None, None), "LATE");
    }

    #[test]
    fn unknown_label_degrades_to_empty_template() {
        let store = store();
        let template = store.template_or_fallback("NOPE");
        assert_eq!(template.status, "unknown");
        assert!(template.items.is_empty());
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = ScenarioStore::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ScenarioError::NotFound(_)));
    }

    #[test]
    fn malformed_yaml_is_fatal() {
        let dir = std::env::temp_dir().join("supportbench-scenarios-test");
        std::fs::create_dir_all(&dir).expect("tempdir");
        let path = dir.join("broken.yaml");
        std::fs::write(&path, "LATE: [unclosed").expect("write");
        let err = ScenarioStore::load(&path).unwrap_err();
        assert!(matches!(err, ScenarioError::Malformed { .. }));
    }

    #[test]
    fn non_mapping_document_is_fatal() {
        let dir = std::env::temp_dir().join("supportbench-scenarios-test");
        std::fs::create_dir_all(&dir).expect("tempdir");
        let path = dir.join("sequence.yaml");
        std::fs::write(&path, "- LATE\n- MISS\n").expect("write");
        let err = ScenarioStore::load(&path).unwrap_err();
        assert!(matches!(err, ScenarioError::NotAMapping(_)));
    }
}
