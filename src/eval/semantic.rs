use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::providers::LLMProvider;
use crate::types::EmbeddingRequest;
use crate::LLMError;

/// Exemplar phrases counted per rubric category. Substring matching over
/// normalized text; hits are capped at the category target.
const ACCURACY_PHRASES: &[&str] = &[
    "tracker shows",
    "current status",
    "eta",
    "items in your order",
    "confirm",
    "order id",
    "ord-",
    "was expected",
    "out for delivery",
    "driver is en route",
    "delivered",
    "preparing",
];

const EMPATHY_PHRASES: &[&str] = &[
    "i'm sorry",
    "so sorry",
    "i understand",
    "i know this is frustrating",
    "thanks for your patience",
    "apologize for the inconvenience",
    "that sounds disappointing",
];

const RESOLUTION_PHRASES: &[&str] = &[
    "issued a credit",
    "partial credit",
    "processed a refund",
    "full refund",
    "replacement",
    "partial refund",
    "resolution",
    "resend the order",
    "updated the address",
    "escalated this",
    "logged the issue",
    "applied a voucher",
];

const CLARITY_PHRASES: &[&str] = &[
    "please",
    "thank you",
    "could you",
    "can you",
    "let me",
    "i can help",
    "i'll take care of this",
    "here's what i've done",
    "anything else i can assist you with",
    "has this resolved your issue",
    "does this resolve your issue",
    "does this help",
    "has this been resolved",
    "let me know if you need anything else",
    "please confirm",
    "thanks for confirming",
    "please share",
    "please provide",
    "please let me know",
];

const TARGET_MATCHES: usize = 3;
const CLARITY_TARGET: usize = 1;

const WEIGHT_ACCURACY: f32 = 0.30;
const WEIGHT_EMPATHY: f32 = 0.30;
const WEIGHT_RESOLUTION: f32 = 0.25;
const WEIGHT_CLARITY: f32 = 0.15;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Case-folds, straightens fancy quotes and dashes, and collapses
/// whitespace so substring matching is robust to markdown rendering.
pub fn normalize(text: &str) -> String {
    let lowered = text
        .to_lowercase()
        .replace('\u{2019}', "'")
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"")
        .replace('\u{2013}', "-");
    WHITESPACE.replace_all(&lowered, " ").trim().to_string()
}

/// Embedding capability used for the cosine-similarity half of the score.
/// Kept as its own trait so the scorer can run offline without a provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError>;
}

/// Provider-backed embedder over the hosted embeddings endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LLMError> {
        let response = self
            .provider
            .create_embeddings(EmbeddingRequest::new(self.model.clone(), texts.to_vec()))
            .await?;

        let mut embeddings = response.data;
        embeddings.sort_by_key(|embedding| embedding.index);
        Ok(embeddings
            .into_iter()
            .map(|embedding| embedding.embedding)
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Per-category rubric percentages, each 0 to 100.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RubricScores {
    pub accuracy: f32,
    pub empathy: f32,
    pub resolution: f32,
    pub clarity_tone: f32,
}

impl RubricScores {
    pub fn weighted_total(&self) -> f32 {
        let total = self.accuracy * WEIGHT_ACCURACY
            + self.empathy * WEIGHT_EMPATHY
            + self.resolution * WEIGHT_RESOLUTION
            + self.clarity_tone * WEIGHT_CLARITY;
        round1(total)
    }
}

/// Counts exemplar-phrase hits per category, capped at the category target
/// and scaled to a percentage. Monotonic: adding matching phrases to the
/// text never lowers a score.
pub fn rubric_scores(text: &str) -> RubricScores {
    let normalized = normalize(text);
    RubricScores {
        accuracy: category_score(&normalized, ACCURACY_PHRASES, TARGET_MATCHES),
        empathy: category_score(&normalized, EMPATHY_PHRASES, TARGET_MATCHES),
        resolution: category_score(&normalized, RESOLUTION_PHRASES, TARGET_MATCHES),
        clarity_tone: category_score(&normalized, CLARITY_PHRASES, CLARITY_TARGET),
    }
}

fn category_score(normalized: &str, phrases: &[&str], target: usize) -> f32 {
    let matches = phrases
        .iter()
        .filter(|phrase| normalized.contains(&normalize(phrase)))
        .count();
    round1(matches.min(target) as f32 / target as f32 * 100.0)
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// One phase's reference-based evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticReport {
    pub phase: u8,
    /// Similarity to the reference agent line, 0 to 100. `None` when the
    /// reference document has no line for this phase.
    pub similarity: Option<f32>,
    pub rubric: RubricScores,
    pub rubric_weighted: f32,
}

impl SemanticReport {
    pub fn summary(&self) -> String {
        let similarity = match self.similarity {
            Some(score) => format!("{score}%"),
            None => "n/a (no reference line)".to_string(),
        };
        format!(
            "Phase {} Semantic Score: {similarity} | Accuracy: {}%, Empathy: {}%, \
             Resolution: {}%, Clarity Tone: {}% | Rubric Score: {}%",
            self.phase,
            self.rubric.accuracy,
            self.rubric.empathy,
            self.rubric.resolution,
            self.rubric.clarity_tone,
            self.rubric_weighted
        )
    }
}

/// Reference-based scorer: embedding cosine similarity against the ideal
/// agent line plus the phrase-count rubric. Without an embedder it degrades
/// to a lexical edit-distance ratio so batches run offline.
pub struct SemanticEvaluator {
    embedder: Option<Arc<dyn Embedder>>,
}

impl SemanticEvaluator {
    pub fn lexical() -> Self {
        Self { embedder: None }
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
        }
    }

    pub async fn evaluate(
        &self,
        phase: u8,
        reference_line: Option<&str>,
        response: &str,
    ) -> SemanticReport {
        let similarity = match reference_line {
            Some(reference) => Some(self.similarity(reference, response).await),
            None => None,
        };

        let rubric = rubric_scores(response);
        SemanticReport {
            phase,
            similarity,
            rubric_weighted: rubric.weighted_total(),
            rubric,
        }
    }

    async fn similarity(&self, reference: &str, response: &str) -> f32 {
        if let Some(embedder) = &self.embedder {
            match embedder
                .embed(&[response.to_string(), reference.to_string()])
                .await
            {
                Ok(embeddings) if embeddings.len() == 2 => {
                    // Cosine ranges -1..=1; anti-parallel embeddings must not
                    // report a negative percentage.
                    let scaled = cosine_similarity(&embeddings[0], &embeddings[1]) * 100.0;
                    return round1(scaled.clamp(0.0, 100.0));
                }
                Ok(_) => warn!("embedder returned wrong arity, using lexical similarity"),
                Err(error) => warn!(%error, "embedding failed, using lexical similarity"),
            }
        }

        let score = strsim::normalized_levenshtein(&normalize(reference), &normalize(response));
        round1(score as f32 * 100.0)
    }
}
