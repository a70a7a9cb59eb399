//! Core domain model for the portfolio sync pipeline.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

pub mod response;
pub mod similarity;

pub const CRATE_NAME: &str = "folio-core";

/// Image reference used when no project-specific asset exists.
pub const DEFAULT_IMAGE: &str = "default";

/// Reserved topic that forces a repository into the portfolio.
pub const PORTFOLIO_TOPIC: &str = "portfolio";

pub const MAX_TOPICS: usize = 8;

/// Raw repository record as returned by the hosting API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRepository {
    pub name: String,
    pub full_name: String,
    pub owner: String,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub fork: bool,
    pub contributed: bool,
    pub homepage: Option<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl CandidateRepository {
    /// Trimmed description, empty when absent.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn has_description(&self) -> bool {
        !self.description_text().is_empty()
    }

    pub fn is_owned_by(&self, login: &str) -> bool {
        self.owner.eq_ignore_ascii_case(login)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t.eq_ignore_ascii_case(topic))
    }

    /// Most recent of the push and metadata-update timestamps.
    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.pushed_at {
            Some(pushed) if pushed > self.updated_at => pushed,
            _ => self.updated_at,
        }
    }
}

/// Portfolio-facing projection of a repository, as persisted for the website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub name: String,
    pub title: String,
    /// Locale code -> display text.
    pub description: BTreeMap<String, String>,
    /// Four-digit year.
    pub date: String,
    pub image: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub language: Option<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(default = "default_owned")]
    pub owned: bool,
}

fn default_owned() -> bool {
    true
}

/// Title/description pair produced by the enhancement step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enhancement {
    pub title: String,
    pub description: String,
}

impl ProjectRecord {
    pub fn from_candidate(
        repo: &CandidateRepository,
        enhancement: Enhancement,
        locale: &str,
        image: String,
        owned: bool,
    ) -> Self {
        let mut description = BTreeMap::new();
        description.insert(locale.to_string(), enhancement.description);
        Self {
            name: repo.name.clone(),
            title: enhancement.title,
            description,
            date: repo.created_at.year().to_string(),
            image,
            topics: capped_topics(&repo.topics),
            url: repo.html_url.clone(),
            homepage: repo.homepage.clone().filter(|h| !h.trim().is_empty()),
            stars: repo.stars,
            language: repo.language.clone(),
            last_updated: repo.updated_at,
            owned,
        }
    }

    /// Refreshes the fields that drift between syncs while keeping the
    /// curated title, description and image.
    pub fn refresh_from(&mut self, repo: &CandidateRepository) {
        self.stars = repo.stars;
        self.last_updated = repo.updated_at;
        self.topics = capped_topics(&repo.topics);
        self.url = repo.html_url.clone();
        self.homepage = repo.homepage.clone().filter(|h| !h.trim().is_empty());
        if repo.language.is_some() {
            self.language = repo.language.clone();
        }
    }

    pub fn year(&self) -> i32 {
        self.date.trim().parse().unwrap_or(0)
    }

    /// Description in the requested locale, falling back to any locale present.
    pub fn description_in(&self, locale: &str) -> &str {
        self.description
            .get(locale)
            .or_else(|| self.description.values().next())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn capped_topics(topics: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for topic in topics {
        let topic = topic.trim();
        if topic.is_empty() || out.iter().any(|t| t == topic) {
            continue;
        }
        out.push(topic.to_string());
        if out.len() == MAX_TOPICS {
            break;
        }
    }
    out
}

/// Display order: year descending, then last-updated descending.
pub fn collection_order(a: &ProjectRecord, b: &ProjectRecord) -> Ordering {
    b.year()
        .cmp(&a.year())
        .then_with(|| b.last_updated.cmp(&a.last_updated))
}

/// Stable sort into display order; records with equal keys keep their
/// relative position.
pub fn sort_collection(records: &mut [ProjectRecord]) {
    records.sort_by(collection_order);
}

pub fn is_sorted(records: &[ProjectRecord]) -> bool {
    records
        .windows(2)
        .all(|pair| collection_order(&pair[0], &pair[1]) != Ordering::Greater)
}

/// Year -> record count, newest year first.
pub fn per_year_counts(records: &[ProjectRecord]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.date.clone()).or_default() += 1;
    }
    counts.into_iter().rev().collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    pub reason: String,
}

impl RelevanceVerdict {
    pub fn accept(reason: impl Into<String>) -> Self {
        Self {
            relevant: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            relevant: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub duplicate: bool,
    pub confidence: f64,
    pub reason: String,
}

impl DuplicateVerdict {
    pub fn distinct(reason: impl Into<String>) -> Self {
        Self {
            duplicate: false,
            confidence: 0.0,
            reason: reason.into(),
        }
    }

    /// True when flagged duplicate with confidence strictly above `threshold`.
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.duplicate && self.confidence > threshold
    }
}

/// Thresholds shared by the pre-classification candidate filter and the
/// post-enhancement duplicate resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    /// Normalized-name similarity above which candidates collapse before classification.
    pub prefilter_name_threshold: f64,
    /// Description token overlap above which candidates collapse before classification.
    pub prefilter_description_threshold: f64,
    /// Confidence (model) or title overlap (fallback) above which accepted records merge.
    pub duplicate_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            prefilter_name_threshold: 0.7,
            prefilter_description_threshold: 0.8,
            duplicate_threshold: 0.85,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    fn record(name: &str, year: &str, updated: DateTime<Utc>) -> ProjectRecord {
        ProjectRecord {
            name: name.into(),
            title: name.into(),
            description: BTreeMap::from([("en".to_string(), "desc".to_string())]),
            date: year.into(),
            image: DEFAULT_IMAGE.into(),
            topics: vec![],
            url: format!("https://github.com/acme/{name}"),
            homepage: None,
            stars: 0,
            language: None,
            last_updated: updated,
            owned: true,
        }
    }

    #[test]
    fn sort_orders_by_year_then_last_updated() {
        let mut records = vec![
            record("old", "2021", ts(2024, 1, 1)),
            record("new-early", "2024", ts(2024, 2, 1)),
            record("new-late", "2024", ts(2024, 6, 1)),
        ];
        sort_collection(&mut records);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["new-late", "new-early", "old"]);
        assert!(is_sorted(&records));
    }

    #[test]
    fn from_candidate_caps_topics_and_derives_year() {
        let repo = CandidateRepository {
            name: "widget".into(),
            full_name: "acme/widget".into(),
            owner: "acme".into(),
            description: Some("A widget".into()),
            topics: (0..12).map(|i| format!("t{i}")).collect(),
            language: Some("C".into()),
            stars: 4,
            fork: false,
            contributed: false,
            homepage: Some("  ".into()),
            html_url: "https://github.com/acme/widget".into(),
            created_at: ts(2023, 3, 1),
            updated_at: ts(2024, 3, 1),
            pushed_at: None,
        };
        let rec = ProjectRecord::from_candidate(
            &repo,
            Enhancement {
                title: "Widget".into(),
                description: "Does widgets.".into(),
            },
            "en",
            DEFAULT_IMAGE.into(),
            true,
        );
        assert_eq!(rec.date, "2023");
        assert_eq!(rec.topics.len(), MAX_TOPICS);
        assert_eq!(rec.homepage, None);
        assert_eq!(rec.description_in("fr"), "Does widgets.");
    }

    #[test]
    fn per_year_counts_newest_first() {
        let records = vec![
            record("a", "2022", ts(2022, 1, 1)),
            record("b", "2024", ts(2024, 1, 1)),
            record("c", "2024", ts(2024, 2, 1)),
        ];
        assert_eq!(
            per_year_counts(&records),
            vec![("2024".to_string(), 2), ("2022".to_string(), 1)]
        );
    }

    #[test]
    fn duplicate_verdict_requires_strictly_higher_confidence() {
        let at_threshold = DuplicateVerdict {
            duplicate: true,
            confidence: 0.85,
            reason: String::new(),
        };
        assert!(!at_threshold.is_confident(0.85));
        let above = DuplicateVerdict {
            confidence: 0.9,
            ..at_threshold
        };
        assert!(above.is_confident(0.85));
    }
}
