//! Display titles, short descriptions and images for accepted repositories.

use std::sync::{Arc, LazyLock};

use folio_adapters::{ChatMessage, ChatModel, ImageModel};
use folio_core::response::extract_structured;
use folio_core::{CandidateRepository, Enhancement, DEFAULT_IMAGE};
use folio_storage::AssetStore;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const MAX_TITLE_CHARS: usize = 50;
pub const MAX_DESCRIPTION_CHARS: usize = 120;

/// Longest description clause that may stand in for a one-word name.
const MAX_CLAUSE_WORDS: usize = 5;

const ENHANCE_SYSTEM_PROMPT: &str = "You write copy for a developer portfolio. \
Given repository metadata, produce:\n\
- title: a concise human-readable project name (max 50 characters). Remove repository \
naming artifacts such as date ranges (2023-2024), team-N, project-N and similar suffixes.\n\
- description: one or two action-oriented sentences describing what the project does \
(max 120 characters).\n\
Answer with a JSON object only: {\"title\": \"...\", \"description\": \"...\"}";

static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));
static DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:19|20)\d{2}\s+(?:(?:19|20)\d{2}|\d{2})\b").expect("valid regex")
});
static NAMING_ORDINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:team|project|group|lab|tp|td)\s*\d+\b").expect("valid regex")
});
static ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:a|an|the)\s+").expect("valid regex"));

/// Separators to spaces, camelCase split, date ranges and naming ordinals removed.
pub fn clean_repository_name(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '.') { ' ' } else { c })
        .collect();
    let spaced = CAMEL_BOUNDARY.replace_all(&spaced, "$1 $2");
    let without_dates = DATE_RANGE.replace_all(&spaced, " ");
    let without_ordinals = NAMING_ORDINAL.replace_all(&without_dates, " ");
    without_ordinals
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Capitalizes lowercase words; words already carrying capitals (acronyms) are kept.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            if word.chars().any(char::is_uppercase) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shortens `text` to at most `max` characters, cutting on a word boundary.
pub fn truncate_on_word(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let budget: String = text.chars().take(max.saturating_sub(1)).collect();
    let cut = match budget.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &budget[..idx],
        _ => budget.as_str(),
    };
    let cut = cut
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '.' | '-'));
    format!("{cut}…")
}

/// First short clause of `description` when it opens with `word`
/// ("A widget simulator." + `widget` -> "widget simulator").
fn leading_clause_for(word: &str, description: &str) -> Option<String> {
    let without_article = ARTICLE.replace(description.trim(), "");
    let clause = without_article
        .split(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '(' | '\n'))
        .next()?
        .trim();
    let words: Vec<&str> = clause.split_whitespace().collect();
    if words.len() < 2 || words.len() > MAX_CLAUSE_WORDS {
        return None;
    }
    words[0]
        .eq_ignore_ascii_case(word)
        .then(|| words.join(" ").to_lowercase())
}

pub fn fallback_title(name: &str, description: Option<&str>) -> String {
    let cleaned = clean_repository_name(name);
    let base = if cleaned.is_empty() {
        name.chars()
            .map(|c| if matches!(c, '-' | '_' | '.') { ' ' } else { c })
            .collect::<String>()
    } else {
        cleaned
    };

    let mut words = base.split_whitespace();
    let single = match (words.next(), words.next()) {
        (Some(word), None) => Some(word.to_string()),
        _ => None,
    };
    let phrase = single
        .zip(description.filter(|d| !d.trim().is_empty()))
        .and_then(|(word, description)| leading_clause_for(&word, description))
        .unwrap_or(base);

    truncate_on_word(&title_case(&phrase), MAX_TITLE_CHARS)
}

pub fn fallback_description(
    title: &str,
    description: Option<&str>,
    language: Option<&str>,
) -> String {
    let text = match (description.map(str::trim).filter(|d| !d.is_empty()), language) {
        (Some(description), _) => description.to_string(),
        (None, Some(language)) => format!("{title} project written in {language}."),
        (None, None) => format!("{title} project."),
    };
    truncate_on_word(&text, MAX_DESCRIPTION_CHARS)
}

/// Deterministic title/description used without a model.
pub fn fallback_enhancement(repo: &CandidateRepository) -> Enhancement {
    let description = repo.description.as_deref();
    let title = fallback_title(&repo.name, description);
    let description = fallback_description(&title, description, repo.language.as_deref());
    Enhancement { title, description }
}

#[derive(Debug, Deserialize)]
struct ModelEnhancement {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

pub struct Enhancer {
    chat: Option<Arc<dyn ChatModel>>,
    images: Option<Arc<dyn ImageModel>>,
    assets: AssetStore,
}

impl Enhancer {
    pub fn new(
        chat: Option<Arc<dyn ChatModel>>,
        images: Option<Arc<dyn ImageModel>>,
        assets: AssetStore,
    ) -> Self {
        Self {
            chat,
            images,
            assets,
        }
    }

    pub async fn enhance(&self, repo: &CandidateRepository, readme: Option<&str>) -> Enhancement {
        let fallback = fallback_enhancement(repo);
        let Some(chat) = &self.chat else {
            return fallback;
        };

        let mut brief = serde_json::json!({
            "name": repo.name,
            "description": repo.description_text(),
            "topics": repo.topics,
            "language": repo.language,
        });
        if let Some(readme) = readme.map(str::trim).filter(|r| !r.is_empty()) {
            brief["readme_excerpt"] =
                serde_json::Value::String(readme.chars().take(1000).collect());
        }
        let messages = [
            ChatMessage::system(ENHANCE_SYSTEM_PROMPT),
            ChatMessage::user(brief.to_string()),
        ];

        let raw = match chat.complete(&messages).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "enhancement model call failed; using fallback"
                );
                return fallback;
            }
        };
        match extract_structured::<ModelEnhancement>(&raw) {
            Ok(model) => {
                let title = model.title.trim();
                let description = model.description.trim();
                Enhancement {
                    title: if title.is_empty() {
                        fallback.title
                    } else {
                        truncate_on_word(title, MAX_TITLE_CHARS)
                    },
                    description: if description.is_empty() {
                        fallback.description
                    } else {
                        truncate_on_word(description, MAX_DESCRIPTION_CHARS)
                    },
                }
            }
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "unparseable enhancement answer; using fallback"
                );
                fallback
            }
        }
    }

    /// Existing image for the repository, a freshly generated one when image
    /// generation is enabled, otherwise the default placeholder.
    pub async fn select_image(
        &self,
        repo: &CandidateRepository,
        enhancement: &Enhancement,
    ) -> String {
        match self.assets.existing_image(&repo.name).await {
            Ok(Some(path)) => {
                debug!(repo = %repo.full_name, path = %path, "reusing existing project image");
                return path;
            }
            Ok(None) => {}
            Err(err) => warn!(repo = %repo.full_name, error = %err, "image lookup failed"),
        }

        let Some(images) = &self.images else {
            return DEFAULT_IMAGE.to_string();
        };
        let prompt = format!(
            "Minimal flat illustration representing a software project called \"{}\": {}. \
No text, no letters, clean background.",
            enhancement.title, enhancement.description
        );
        match images.generate(&prompt).await {
            Ok(bytes) => match self.assets.store_image(&repo.name, &bytes).await {
                Ok(path) => {
                    info!(repo = %repo.full_name, path = %path, "generated project image");
                    path
                }
                Err(err) => {
                    warn!(repo = %repo.full_name, error = %err, "storing generated image failed");
                    DEFAULT_IMAGE.to_string()
                }
            },
            Err(err) => {
                warn!(repo = %repo.full_name, error = %err, "image generation failed");
                DEFAULT_IMAGE.to_string()
            }
        }
    }
}
