//! Portfolio relevance decisions.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use folio_adapters::{ChatMessage, ChatModel};
use folio_core::response::extract_structured;
use folio_core::{CandidateRepository, RelevanceVerdict};
use serde::Deserialize;
use tracing::{debug, warn};

const README_EXCERPT_CHARS: usize = 1500;

const RELEVANCE_SYSTEM_PROMPT: &str = "You curate a developer's portfolio website. \
Decide whether a GitHub repository belongs in the portfolio.\n\
Exclude only:\n\
- profile README repositories (named after the user)\n\
- pure dotfiles or configuration repositories\n\
- repositories holding only notes or course material without code\n\
- empty repositories\n\
- trivial hello-world or tutorial boilerplate\n\
Include any real code project, including incomplete hackathon or school work. \
When in doubt, include.\n\
Answer with a JSON object only: {\"relevant\": true|false, \"reason\": \"short reason\"}";

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    config_name_tokens: Vec<String>,
    #[serde(default)]
    config_description_phrases: Vec<String>,
}

/// Keyword lists for the deterministic relevance heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceRules {
    pub config_name_tokens: Vec<String>,
    pub config_description_phrases: Vec<String>,
}

impl Default for RelevanceRules {
    fn default() -> Self {
        Self {
            config_name_tokens: [
                "dotfiles",
                "dotfile",
                "config",
                "configs",
                "configuration",
                "vimrc",
                "zshrc",
                "bashrc",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            config_description_phrases: [
                "dotfiles",
                "my config",
                "my configuration",
                "configuration files",
                "personal configuration",
                "my setup",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl RelevanceRules {
    /// Reads a rules YAML file, or the built-in lists when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no relevance rules file; using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: RulesFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self {
            config_name_tokens: lowercase_all(file.config_name_tokens),
            config_description_phrases: lowercase_all(file.config_description_phrases),
        })
    }

    pub fn is_configuration_repo(&self, repo: &CandidateRepository) -> bool {
        if repo.name.starts_with('.') {
            return true;
        }
        let name = repo.name.to_lowercase();
        let name_hit = name
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| self.config_name_tokens.iter().any(|k| k == token));
        if name_hit {
            return true;
        }
        let description = repo.description_text().to_lowercase();
        !description.is_empty()
            && self
                .config_description_phrases
                .iter()
                .any(|phrase| description.contains(phrase.as_str()))
    }
}

fn lowercase_all(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Deterministic verdict used when no model is available or its answer is unusable.
pub fn heuristic_verdict(
    repo: &CandidateRepository,
    owner: &str,
    rules: &RelevanceRules,
) -> RelevanceVerdict {
    if repo.name.eq_ignore_ascii_case(owner) {
        return RelevanceVerdict::reject("Profile README");
    }
    if rules.is_configuration_repo(repo) {
        return RelevanceVerdict::reject("Configuration or dotfiles repository");
    }
    if !repo.has_description() && repo.topics.is_empty() && repo.stars == 0 {
        return RelevanceVerdict::reject("No description, topics, or stars");
    }
    RelevanceVerdict::accept("Has description, topics, or stars")
}

#[derive(Debug, Deserialize)]
struct ModelVerdict {
    #[serde(alias = "is_relevant", alias = "isRelevant", alias = "include")]
    relevant: bool,
    #[serde(default)]
    reason: String,
}

pub struct RelevanceClassifier {
    owner: String,
    rules: RelevanceRules,
    chat: Option<Arc<dyn ChatModel>>,
}

impl RelevanceClassifier {
    pub fn new(
        owner: impl Into<String>,
        rules: RelevanceRules,
        chat: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        Self {
            owner: owner.into(),
            rules,
            chat,
        }
    }

    pub fn uses_model(&self) -> bool {
        self.chat.is_some()
    }

    /// Name of the chat model in use, `None` on the heuristic path.
    pub fn model_name(&self) -> Option<&str> {
        self.chat.as_deref().map(|chat| chat.model_name())
    }

    pub async fn classify(
        &self,
        repo: &CandidateRepository,
        readme: Option<&str>,
    ) -> RelevanceVerdict {
        let Some(chat) = &self.chat else {
            return heuristic_verdict(repo, &self.owner, &self.rules);
        };

        let messages = [
            ChatMessage::system(RELEVANCE_SYSTEM_PROMPT),
            ChatMessage::user(repository_brief(repo, &self.owner, readme)),
        ];
        let raw = match chat.complete(&messages).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "relevance model call failed; using heuristic"
                );
                return heuristic_verdict(repo, &self.owner, &self.rules);
            }
        };
        match extract_structured::<ModelVerdict>(&raw) {
            Ok(verdict) => {
                let reason = verdict.reason.trim();
                RelevanceVerdict {
                    relevant: verdict.relevant,
                    reason: if reason.is_empty() {
                        "Classified by model".to_string()
                    } else {
                        reason.to_string()
                    },
                }
            }
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "unparseable relevance answer; using heuristic"
                );
                heuristic_verdict(repo, &self.owner, &self.rules)
            }
        }
    }
}

/// Public metadata block sent to the model.
pub(crate) fn repository_brief(
    repo: &CandidateRepository,
    owner: &str,
    readme: Option<&str>,
) -> String {
    let mut brief = serde_json::json!({
        "name": repo.name,
        "owner_username": owner,
        "description": repo.description_text(),
        "topics": repo.topics,
        "language": repo.language,
        "stars": repo.stars,
    });
    if let Some(readme) = readme.map(str::trim).filter(|r| !r.is_empty()) {
        let excerpt: String = readme.chars().take(README_EXCERPT_CHARS).collect();
        brief["readme_excerpt"] = serde_json::Value::String(excerpt);
    }
    brief.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use folio_adapters::ChatError;
    use tempfile::tempdir;

    fn repo(
        name: &str,
        description: Option<&str>,
        topics: &[&str],
        stars: u64,
    ) -> CandidateRepository {
        CandidateRepository {
            name: name.into(),
            full_name: format!("dev/{name}"),
            owner: "dev".into(),
            description: description.map(str::to_string),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            language: None,
            stars,
            fork: false,
            contributed: false,
            homepage: None,
            html_url: format!("https://github.com/dev/{name}"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single().unwrap(),
            pushed_at: None,
        }
    }

    struct ScriptedChat(Result<String, ()>);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ChatError> {
            self.0.clone().map_err(|_| ChatError::EmptyResponse)
        }
    }

    fn classifier(chat: Option<ScriptedChat>) -> RelevanceClassifier {
        RelevanceClassifier::new(
            "dev",
            RelevanceRules::default(),
            chat.map(|c| Arc::new(c) as Arc<dyn ChatModel>),
        )
    }

    #[test]
    fn model_name_reports_the_active_path() {
        assert_eq!(classifier(None).model_name(), None);
        let scripted = classifier(Some(ScriptedChat(Ok(String::new()))));
        assert_eq!(scripted.model_name(), Some("scripted"));
    }

    #[tokio::test]
    async fn empty_repo_is_rejected_without_model() {
        let verdict = classifier(None).classify(&repo("scratch", None, &[], 0), None).await;
        assert!(!verdict.relevant);
    }

    #[tokio::test]
    async fn description_alone_makes_repo_relevant() {
        let verdict = classifier(None)
            .classify(&repo("scratch", Some("Tiny interpreter"), &[], 0), None)
            .await;
        assert!(verdict.relevant);
    }

    #[test]
    fn profile_readme_is_rejected() {
        let verdict = heuristic_verdict(
            &repo("Dev", None, &[], 0),
            "dev",
            &RelevanceRules::default(),
        );
        assert_eq!(verdict, RelevanceVerdict::reject("Profile README"));
    }

    #[test]
    fn configuration_repos_are_rejected() {
        let rules = RelevanceRules::default();
        for candidate in [
            repo("dotfiles", Some("Arch setup"), &[], 4),
            repo(".github", None, &["meta"], 0),
            repo("nvim-config", None, &[], 2),
            repo("workstation", Some("My config for i3 and tmux"), &[], 0),
        ] {
            assert!(
                !heuristic_verdict(&candidate, "dev", &rules).relevant,
                "{} should be rejected",
                candidate.name
            );
        }
        let configurator = repo("configurator-ui", Some("Form builder"), &[], 0);
        assert!(heuristic_verdict(&configurator, "dev", &rules).relevant);
    }

    #[tokio::test]
    async fn fenced_model_answer_is_used() {
        let chat = ScriptedChat(Ok(
            "```json\n{\"relevant\": false, \"reason\": \"Course notes only\"}\n```".into(),
        ));
        let verdict = classifier(Some(chat))
            .classify(&repo("algo-notes", Some("Lecture notes"), &[], 3), None)
            .await;
        assert_eq!(verdict, RelevanceVerdict::reject("Course notes only"));
    }

    #[tokio::test]
    async fn unusable_model_answer_falls_back_to_heuristic() {
        let garbled = classifier(Some(ScriptedChat(Ok("I think so!".into()))));
        let verdict = garbled
            .classify(&repo("scratch", Some("Tiny interpreter"), &[], 0), None)
            .await;
        assert!(verdict.relevant);

        let failing = classifier(Some(ScriptedChat(Err(()))));
        let verdict = failing.classify(&repo("dev", None, &[], 0), None).await;
        assert_eq!(verdict.reason, "Profile README");
    }

    #[test]
    fn rules_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relevance.yaml");
        std::fs::write(
            &path,
            "version: 1\nconfig_name_tokens: [Homelab]\nconfig_description_phrases: []\n",
        )
        .unwrap();
        let rules = RelevanceRules::load_or_default(&path).unwrap();
        assert_eq!(rules.config_name_tokens, ["homelab"]);
        assert!(rules.is_configuration_repo(&repo("homelab", None, &[], 0)));
        assert!(!rules.is_configuration_repo(&repo("dotfiles-viewer", None, &[], 0)));

        let missing = RelevanceRules::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(missing, RelevanceRules::default());
    }

    #[test]
    fn brief_includes_readme_excerpt() {
        let brief = repository_brief(
            &repo("widget", Some("A widget"), &["c"], 1),
            "dev",
            Some("# Widget\nBuild it."),
        );
        let value: serde_json::Value = serde_json::from_str(&brief).unwrap();
        assert_eq!(value["owner_username"], "dev");
        assert_eq!(value["readme_excerpt"], "# Widget\nBuild it.");
    }
}
