//! Collusion and template-reuse detection.
//!
//! Payloads are compared as canonical (sorted-key) JSON. Only payloads that
//! parse to a non-empty object take part, so failed or empty responses are
//! never flagged as copies of each other.

pub mod blacklist;
pub mod similarity;

use std::collections::{BTreeMap, HashMap, VecDeque};

use arbiter_state::WorkerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::AntiCheatConfig;
use crate::domain::{ScoreBreakdown, WorkerResponse};
use crate::scoring::text::{as_object, canonical_json};

pub use blacklist::BlacklistPolicy;
pub use similarity::{BigramJaccard, LevenshteinRatio, SimilarityFn, SimilarityKind};

/// What happens to the score of a flagged response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PenaltyPolicy {
    /// Scale every component by `factor`.
    Multiply { factor: f64 },
    /// Cap the total at `score`, scaling components proportionally.
    Replace { score: f64 },
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        PenaltyPolicy::Multiply { factor: 0.1 }
    }
}

impl PenaltyPolicy {
    pub fn apply(&self, breakdown: &ScoreBreakdown) -> ScoreBreakdown {
        match *self {
            PenaltyPolicy::Multiply { factor } => breakdown.scaled(factor),
            PenaltyPolicy::Replace { score } => {
                if breakdown.total <= score {
                    *breakdown
                } else {
                    breakdown.scaled(score / breakdown.total)
                }
            }
        }
    }
}

/// Why a response was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagReason {
    /// Too similar to another worker's response in the same round.
    CrossSubmission { other: WorkerId, similarity: f64 },
    /// Too similar to one of the worker's own recent responses.
    TemplateReuse { similarity: f64 },
}

impl FlagReason {
    pub fn label(&self) -> &'static str {
        match self {
            FlagReason::CrossSubmission { .. } => "cross_submission",
            FlagReason::TemplateReuse { .. } => "template_reuse",
        }
    }

    pub fn similarity(&self) -> f64 {
        match self {
            FlagReason::CrossSubmission { similarity, .. }
            | FlagReason::TemplateReuse { similarity } => *similarity,
        }
    }
}

struct Fingerprint {
    canonical: String,
    digest: [u8; 32],
}

impl Fingerprint {
    fn of(payload: &Value) -> Option<Self> {
        let obj = as_object(payload).filter(|o| !o.is_empty())?;
        let canonical = canonical_json(&Value::Object(obj));
        let hash = Sha256::digest(canonical.as_bytes());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hash);
        Some(Self { canonical, digest })
    }
}

pub struct AntiCheatDetector {
    similarity: Box<dyn SimilarityFn>,
    cross_threshold: f64,
    history_threshold: f64,
    history_depth: usize,
    history: HashMap<WorkerId, VecDeque<Fingerprint>>,
}

impl AntiCheatDetector {
    pub fn new(config: &AntiCheatConfig) -> Self {
        Self {
            similarity: config.similarity.build(),
            cross_threshold: config.cross_threshold,
            history_threshold: config.history_threshold,
            history_depth: config.history_depth,
            history: HashMap::new(),
        }
    }

    /// Swap in a custom similarity strategy.
    pub fn with_similarity(mut self, similarity: impl SimilarityFn + 'static) -> Self {
        self.similarity = Box::new(similarity);
        self
    }

    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if a.digest == b.digest {
            return 1.0;
        }
        let s = self.similarity.similarity(&a.canonical, &b.canonical);
        if s.is_nan() {
            0.0
        } else {
            s.clamp(0.0, 1.0)
        }
    }

    /// Flag the responses of one round and remember them for later rounds.
    ///
    /// A worker appears at most once in the result, with the first reason found.
    pub fn inspect(&mut self, responses: &[WorkerResponse]) -> BTreeMap<WorkerId, FlagReason> {
        let prints: Vec<(&WorkerId, Fingerprint)> = responses
            .iter()
            .filter_map(|r| Fingerprint::of(&r.payload).map(|fp| (&r.worker_id, fp)))
            .collect();

        let mut flags = BTreeMap::new();
        for (i, (wa, fa)) in prints.iter().enumerate() {
            for (wb, fb) in prints.iter().skip(i + 1) {
                if wa == wb {
                    continue;
                }
                let similarity = self.compare(fa, fb);
                if similarity >= self.cross_threshold {
                    flags
                        .entry((*wa).clone())
                        .or_insert_with(|| FlagReason::CrossSubmission {
                            other: (*wb).clone(),
                            similarity,
                        });
                    flags
                        .entry((*wb).clone())
                        .or_insert_with(|| FlagReason::CrossSubmission {
                            other: (*wa).clone(),
                            similarity,
                        });
                }
            }
        }

        for (worker, fp) in &prints {
            let best = self
                .history
                .get(*worker)
                .into_iter()
                .flatten()
                .map(|past| self.compare(fp, past))
                .fold(0.0_f64, f64::max);
            if best >= self.history_threshold {
                flags
                    .entry((*worker).clone())
                    .or_insert(FlagReason::TemplateReuse { similarity: best });
            }
        }

        for (worker, fp) in prints {
            let past = self.history.entry(worker.clone()).or_default();
            past.push_back(fp);
            while past.len() > self.history_depth {
                past.pop_front();
            }
        }

        flags
    }

    /// Number of remembered payloads for `worker`.
    pub fn history_len(&self, worker: &WorkerId) -> usize {
        self.history.get(worker).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn response(id: &str, payload: Value) -> WorkerResponse {
        WorkerResponse::ok(WorkerId::new(id), payload, Duration::from_secs(1))
    }

    fn detector() -> AntiCheatDetector {
        AntiCheatDetector::new(&AntiCheatConfig::default())
    }

    #[test]
    fn identical_pair_is_flagged_and_distinct_third_is_not() {
        let copied = json!({"title": "The Drowned Bell", "genre": "gothic", "themes": ["grief"]});
        let flags = detector().inspect(&[
            response("a", copied.clone()),
            response("b", copied),
            response(
                "c",
                json!({"title": "Orchard of Debts", "setting": "A valley farm where trees bloom at forgiveness"}),
            ),
        ]);
        assert!(matches!(flags[&WorkerId::new("a")], FlagReason::CrossSubmission { similarity, .. } if similarity == 1.0));
        assert!(flags.contains_key(&WorkerId::new("b")));
        assert!(!flags.contains_key(&WorkerId::new("c")));
    }

    #[test]
    fn key_order_does_not_hide_copies() {
        let flags = detector().inspect(&[
            response("a", json!({"x": 1, "y": "long enough text"})),
            response("b", json!({"y": "long enough text", "x": 1})),
        ]);
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn failures_and_empty_objects_never_match() {
        let mut d = detector();
        let flags = d.inspect(&[
            WorkerResponse::timed_out(WorkerId::new("a"), Duration::from_secs(60)),
            WorkerResponse::timed_out(WorkerId::new("b"), Duration::from_secs(60)),
            response("c", json!({})),
            response("d", json!({})),
        ]);
        assert!(flags.is_empty());
        assert_eq!(d.history_len(&WorkerId::new("a")), 0);
    }

    #[test]
    fn reused_template_is_flagged_in_a_later_round() {
        let mut d = detector();
        let template = json!({"chapters": [{"content": "Once upon a time, the end."}]});
        assert!(d.inspect(&[response("a", template.clone())]).is_empty());
        let flags = d.inspect(&[response("a", template)]);
        assert!(matches!(flags[&WorkerId::new("a")], FlagReason::TemplateReuse { .. }));
    }

    #[test]
    fn history_is_bounded_by_depth() {
        let config = AntiCheatConfig {
            history_depth: 2,
            ..Default::default()
        };
        let mut d = AntiCheatDetector::new(&config);
        for i in 0..5 {
            d.inspect(&[response("a", json!({ "n": i }))]);
        }
        assert_eq!(d.history_len(&WorkerId::new("a")), 2);
    }

    #[test]
    fn custom_similarity_is_used() {
        let mut d = detector().with_similarity(|_: &str, _: &str| 0.95);
        let flags = d.inspect(&[
            response("a", json!({"title": "one"})),
            response("b", json!({"title": "two"})),
        ]);
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn multiply_penalty_scales_every_component() {
        let b = ScoreBreakdown::new(30.0, 20.0, 10.0);
        let p = PenaltyPolicy::Multiply { factor: 0.1 }.apply(&b);
        assert!((p.total - 6.0).abs() < 1e-12);
        assert!((p.structure - 2.0).abs() < 1e-12);
    }

    #[test]
    fn replace_penalty_caps_total() {
        let policy = PenaltyPolicy::Replace { score: 5.0 };
        let high = policy.apply(&ScoreBreakdown::new(30.0, 40.0, 30.0));
        assert!((high.total - 5.0).abs() < 1e-9);
        assert!((high.total - (high.technical + high.structure + high.content)).abs() < 1e-9);

        let low = ScoreBreakdown::new(1.0, 1.0, 1.0);
        assert_eq!(policy.apply(&low), low);
    }
}
