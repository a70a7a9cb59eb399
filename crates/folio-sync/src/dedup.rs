//! Duplicate resolution across the records accepted during one run.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use folio_adapters::{ChatMessage, ChatModel};
use folio_core::response::extract_structured;
use folio_core::similarity::{normalize_name_key, token_overlap};
use folio_core::{DedupConfig, DuplicateVerdict, ProjectRecord};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const DUPLICATE_SYSTEM_PROMPT: &str = "You compare two projects from a developer portfolio \
and decide whether they are the same project published twice.\n\
Weigh these signals:\n\
- similar titles once dates, team numbers and event names are ignored\n\
- overlapping functional descriptions\n\
- a shared technology stack\n\
- the same event or hackathon naming pattern\n\
- one being a fork or mirror of the other\n\
Different projects built at the same event are NOT duplicates.\n\
Answer with a JSON object only: \
{\"is_duplicate\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"short reason\"}";

#[derive(Debug, Deserialize)]
struct ModelDuplicate {
    #[serde(alias = "is_duplicate", alias = "isDuplicate")]
    duplicate: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Which of two duplicates survives: later `last_updated`, then more stars,
/// then the directly owned one. `Greater` means `a` is kept.
pub fn retention_order(a: &ProjectRecord, b: &ProjectRecord) -> Ordering {
    a.last_updated
        .cmp(&b.last_updated)
        .then_with(|| a.stars.cmp(&b.stars))
        .then_with(|| a.owned.cmp(&b.owned))
}

/// String-only verdict: title token overlap, or identical normalized names.
pub fn fallback_verdict(
    a: &ProjectRecord,
    b: &ProjectRecord,
    threshold: f64,
) -> DuplicateVerdict {
    let key_a = normalize_name_key(&a.name);
    if !key_a.is_empty() && key_a == normalize_name_key(&b.name) {
        return DuplicateVerdict {
            duplicate: true,
            confidence: 1.0,
            reason: format!("Names normalize to the same key `{key_a}`"),
        };
    }
    let overlap = token_overlap(&a.title, &b.title);
    DuplicateVerdict {
        duplicate: overlap > threshold,
        confidence: overlap,
        reason: format!("Title token overlap {overlap:.2}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub records: Vec<ProjectRecord>,
    pub duplicates_removed: usize,
}

pub struct DuplicateResolver {
    chat: Option<Arc<dyn ChatModel>>,
    threshold: f64,
    call_delay: Duration,
}

impl DuplicateResolver {
    pub fn new(
        chat: Option<Arc<dyn ChatModel>>,
        config: &DedupConfig,
        call_delay: Duration,
    ) -> Self {
        Self {
            chat,
            threshold: config.duplicate_threshold,
            call_delay,
        }
    }

    /// Verdict for one pair; model answers that fail or do not parse fall
    /// back to string similarity.
    pub async fn judge(&self, a: &ProjectRecord, b: &ProjectRecord) -> DuplicateVerdict {
        let Some(chat) = &self.chat else {
            return fallback_verdict(a, b, self.threshold);
        };

        let messages = [
            ChatMessage::system(DUPLICATE_SYSTEM_PROMPT),
            ChatMessage::user(
                json!({
                    "project_a": record_brief(a),
                    "project_b": record_brief(b),
                })
                .to_string(),
            ),
        ];
        let raw = match chat.complete(&messages).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    a = %a.name,
                    b = %b.name,
                    error = %err,
                    "duplicate model call failed; using title overlap"
                );
                return fallback_verdict(a, b, self.threshold);
            }
        };
        match extract_structured::<ModelDuplicate>(&raw) {
            Ok(model) => DuplicateVerdict {
                duplicate: model.duplicate,
                confidence: if model.confidence.is_finite() {
                    model.confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                },
                reason: model.reason.trim().to_string(),
            },
            Err(err) => {
                warn!(
                    a = %a.name,
                    b = %b.name,
                    error = %err,
                    "unparseable duplicate answer; using title overlap"
                );
                fallback_verdict(a, b, self.threshold)
            }
        }
    }

    /// Folds `records` into a duplicate-free list. Each record is compared
    /// with every record kept so far; on a confident match the better of the
    /// two (per [`retention_order`]) takes the slot.
    pub async fn resolve(&self, records: Vec<ProjectRecord>) -> Resolution {
        let mut kept: Vec<ProjectRecord> = Vec::with_capacity(records.len());
        let mut duplicates_removed = 0usize;
        let mut model_calls = 0usize;

        for incoming in records {
            let mut matched = kept
                .iter()
                .position(|existing| existing.name == incoming.name)
                .map(|idx| {
                    let verdict = DuplicateVerdict {
                        duplicate: true,
                        confidence: 1.0,
                        reason: "Same repository name".to_string(),
                    };
                    (idx, verdict)
                });
            // `kept` names are unique and `incoming.name` is not among them here.
            if matched.is_none() {
                for (idx, existing) in kept.iter().enumerate() {
                    if self.chat.is_some() {
                        if model_calls > 0 && !self.call_delay.is_zero() {
                            tokio::time::sleep(self.call_delay).await;
                        }
                        model_calls += 1;
                    }
                    let verdict = self.judge(existing, &incoming).await;
                    if verdict.is_confident(self.threshold) {
                        matched = Some((idx, verdict));
                        break;
                    }
                }
            }

            let Some((idx, verdict)) = matched else {
                kept.push(incoming);
                continue;
            };
            duplicates_removed += 1;
            let existing = &mut kept[idx];
            if retention_order(&incoming, existing) == Ordering::Greater {
                info!(
                    kept = %incoming.name,
                    dropped = %existing.name,
                    confidence = verdict.confidence,
                    reason = %verdict.reason,
                    "duplicate resolved"
                );
                *existing = incoming;
            } else {
                info!(
                    kept = %existing.name,
                    dropped = %incoming.name,
                    confidence = verdict.confidence,
                    reason = %verdict.reason,
                    "duplicate resolved"
                );
            }
        }

        debug!(
            kept = kept.len(),
            duplicates_removed,
            model_calls,
            "duplicate resolution finished"
        );
        Resolution {
            records: kept,
            duplicates_removed,
        }
    }
}

fn record_brief(record: &ProjectRecord) -> serde_json::Value {
    json!({
        "name": record.name,
        "title": record.title,
        "description": record.description.values().next(),
        "topics": record.topics,
        "language": record.language,
        "url": record.url,
        "homepage": record.homepage,
        "owned": record.owned,
    })
}
