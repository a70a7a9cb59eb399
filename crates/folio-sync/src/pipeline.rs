//! Full and incremental sync runs over the persisted project collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use folio_adapters::{
    ChatModel, GitHubConfig, GitHubSource, ImageModel, OpenAiClient, OpenAiConfig,
    RepositorySource,
};
use folio_core::{
    per_year_counts, CandidateRepository, Enhancement, ProjectRecord, DEFAULT_IMAGE,
};
use folio_storage::{
    AssetStore, BackoffPolicy, DataStore, HttpClientConfig, HttpFetcher, StoreError,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{RelevanceClassifier, RelevanceRules};
use crate::dedup::DuplicateResolver;
use crate::enhance::Enhancer;
use crate::SyncConfig;

/// Languages that carry no runnable code.
const DOCUMENTATION_LANGUAGES: &[&str] = &["markdown", "html", "css", "tex", "roff", "text"];

/// True when a repository's language breakdown holds nothing but markup
/// and prose (or nothing at all).
pub fn is_documentation_only(languages: &BTreeMap<String, u64>) -> bool {
    languages.keys().all(|language| {
        DOCUMENTATION_LANGUAGES
            .iter()
            .any(|doc| language.eq_ignore_ascii_case(doc))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub total: usize,
    pub filtered_out: usize,
    pub duplicates_removed: usize,
    pub errors: usize,
    pub per_year: Vec<(String, usize)>,
    pub data_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IncrementalOutcome {
    /// Already persisted; drifting fields refreshed and moved to the front.
    Refreshed { name: String },
    Added { name: String, title: String },
    Rejected { name: String, reason: String },
    /// Documentation-only repository dropped from the collection.
    Removed { name: String },
    /// Documentation-only repository that was never persisted.
    SkippedDocumentationOnly { name: String },
}

impl IncrementalOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Refreshed { name }
            | Self::Added { name, .. }
            | Self::Rejected { name, .. }
            | Self::Removed { name }
            | Self::SkippedDocumentationOnly { name } => name,
        }
    }

    pub fn wrote_collection(&self) -> bool {
        matches!(self, Self::Refreshed { .. } | Self::Added { .. } | Self::Removed { .. })
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Arc<dyn RepositorySource>,
    classifier: RelevanceClassifier,
    enhancer: Enhancer,
    resolver: DuplicateResolver,
    store: DataStore,
}

impl SyncPipeline {
    /// Wires the GitHub source and, when an API key is configured, the
    /// OpenAI-compatible model client.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: config.http_max_retries,
                ..Default::default()
            },
        })?);

        let source = Arc::new(GitHubSource::new(
            Arc::clone(&http),
            GitHubConfig {
                api_base: config.github_api_url.clone(),
                token: config.github_token.clone(),
                page_delay: config.page_delay,
                dedup: config.dedup,
                ..Default::default()
            },
        ));

        let (chat, images): (Option<Arc<dyn ChatModel>>, Option<Arc<dyn ImageModel>>) =
            match &config.openai_api_key {
                Some(key) => {
                    let client = Arc::new(OpenAiClient::new(
                        Arc::clone(&http),
                        OpenAiConfig {
                            base_url: config.llm_base_url.clone(),
                            chat_model: config.chat_model.clone(),
                            image_model: config.image_model.clone(),
                            ..OpenAiConfig::new(key.clone())
                        },
                    ));
                    let images = config
                        .generate_images
                        .then(|| Arc::clone(&client) as Arc<dyn ImageModel>);
                    (Some(client as Arc<dyn ChatModel>), images)
                }
                None => {
                    warn!("no OPENAI_API_KEY configured; model-assisted steps use heuristics");
                    (None, None)
                }
            };

        let rules = RelevanceRules::load_or_default(&config.rules_file)?;
        Ok(Self::with_components(config, source, chat, images, rules))
    }

    pub fn with_components(
        config: SyncConfig,
        source: Arc<dyn RepositorySource>,
        chat: Option<Arc<dyn ChatModel>>,
        images: Option<Arc<dyn ImageModel>>,
        rules: RelevanceRules,
    ) -> Self {
        let classifier = RelevanceClassifier::new(config.owner.clone(), rules, chat.clone());
        let enhancer = Enhancer::new(
            chat.clone(),
            images,
            AssetStore::new(config.images_dir.clone(), config.images_url_prefix.clone()),
        );
        let resolver = DuplicateResolver::new(chat, &config.dedup, config.dedup_call_delay);
        let store = DataStore::new(config.data_file.clone());
        Self {
            config,
            source,
            classifier,
            enhancer,
            resolver,
            store,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    fn owns(&self, repo: &CandidateRepository) -> bool {
        repo.is_owned_by(&self.config.owner) && !repo.fork
    }

    /// README text for the model prompt; skipped entirely on the heuristic path.
    async fn readme_for(&self, repo: &CandidateRepository, errors: &mut usize) -> Option<String> {
        if !self.classifier.uses_model() {
            return None;
        }
        match self.source.get_readme(&repo.full_name).await {
            Ok(readme) => readme,
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "README fetch failed; classifying without it"
                );
                *errors += 1;
                None
            }
        }
    }

    async fn new_record(&self, repo: &CandidateRepository, readme: Option<&str>) -> ProjectRecord {
        let enhancement = self.enhancer.enhance(repo, readme).await;
        let image = self.enhancer.select_image(repo, &enhancement).await;
        ProjectRecord::from_candidate(
            repo,
            enhancement,
            &self.config.locale,
            image,
            self.owns(repo),
        )
    }

    /// Reuses a persisted record's curated fields; only a placeholder image
    /// is selected again.
    async fn carried_record(
        &self,
        mut record: ProjectRecord,
        repo: &CandidateRepository,
    ) -> ProjectRecord {
        record.refresh_from(repo);
        record.owned = self.owns(repo);
        if record.image == DEFAULT_IMAGE {
            let enhancement = Enhancement {
                title: record.title.clone(),
                description: record.description_in(&self.config.locale).to_string(),
            };
            record.image = self.enhancer.select_image(repo, &enhancement).await;
        }
        record
    }

    async fn load_prior(&self) -> Result<Vec<ProjectRecord>> {
        match self.store.load().await {
            Ok(records) => Ok(records),
            Err(err @ StoreError::Malformed { .. }) => {
                warn!(error = %err, "persisted collection unreadable; regenerating from scratch");
                Ok(Vec::new())
            }
            Err(err) => Err(err).context("loading persisted collection"),
        }
    }

    pub async fn run_full_sync(&self) -> Result<SyncSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            owner = %self.config.owner,
            model = self.classifier.model_name().unwrap_or("heuristic"),
            "full sync started"
        );

        let mut prior: HashMap<String, ProjectRecord> = self
            .load_prior()
            .await?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        let candidates = self
            .source
            .discover(&self.config.owner, &self.config.orgs)
            .await
            .context("discovering repositories")?;
        info!(%run_id, candidates = candidates.len(), "candidates discovered");

        let mut accepted = Vec::with_capacity(candidates.len());
        let mut filtered_out = 0usize;
        let mut errors = 0usize;

        for (idx, repo) in candidates.iter().enumerate() {
            if idx > 0 && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }

            let readme = self.readme_for(repo, &mut errors).await;
            let verdict = self.classifier.classify(repo, readme.as_deref()).await;
            if !verdict.relevant {
                debug!(repo = %repo.full_name, reason = %verdict.reason, "filtered out");
                filtered_out += 1;
                continue;
            }

            let record = match prior.remove(&repo.name) {
                Some(existing) => self.carried_record(existing, repo).await,
                None => self.new_record(repo, readme.as_deref()).await,
            };
            debug!(repo = %repo.full_name, title = %record.title, "accepted");
            accepted.push(record);
        }

        let resolution = self.resolver.resolve(accepted).await;
        let mut records = resolution.records;
        let written = self
            .store
            .write(&mut records)
            .await
            .context("writing project collection")?;

        let summary = SyncSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            candidates: candidates.len(),
            total: records.len(),
            filtered_out,
            duplicates_removed: resolution.duplicates_removed,
            errors,
            per_year: per_year_counts(&records),
            data_file: written.path.display().to_string(),
        };
        info!(
            %run_id,
            total = summary.total,
            filtered_out,
            duplicates_removed = summary.duplicates_removed,
            errors,
            "full sync finished"
        );
        Ok(summary)
    }

    /// Applies one repository's current state to the persisted collection.
    pub async fn run_incremental_sync(&self, full_name: &str) -> Result<IncrementalOutcome> {
        let repo = self
            .source
            .get_repository(full_name)
            .await
            .with_context(|| format!("fetching repository {full_name}"))?;
        let mut records = self.store.load().await.context("loading persisted collection")?;
        let position = records.iter().position(|record| record.name == repo.name);

        let documentation_only = match self.source.get_languages(&repo.full_name).await {
            Ok(languages) => is_documentation_only(&languages),
            Err(err) => {
                warn!(
                    repo = %repo.full_name,
                    error = %err,
                    "language lookup failed; assuming code"
                );
                false
            }
        };

        if documentation_only {
            let Some(idx) = position else {
                info!(repo = %repo.full_name, "documentation-only repository ignored");
                return Ok(IncrementalOutcome::SkippedDocumentationOnly { name: repo.name });
            };
            records.remove(idx);
            self.store
                .write(&mut records)
                .await
                .context("writing project collection")?;
            info!(repo = %repo.full_name, "documentation-only repository removed");
            return Ok(IncrementalOutcome::Removed { name: repo.name });
        }

        if let Some(idx) = position {
            let mut record = records.remove(idx);
            record.refresh_from(&repo);
            records.insert(0, record);
            self.store
                .write(&mut records)
                .await
                .context("writing project collection")?;
            info!(repo = %repo.full_name, stars = repo.stars, "project refreshed");
            return Ok(IncrementalOutcome::Refreshed { name: repo.name });
        }

        let mut errors = 0usize;
        let readme = self.readme_for(&repo, &mut errors).await;
        let verdict = self.classifier.classify(&repo, readme.as_deref()).await;
        if !verdict.relevant {
            info!(repo = %repo.full_name, reason = %verdict.reason, "repository rejected");
            return Ok(IncrementalOutcome::Rejected {
                name: repo.name,
                reason: verdict.reason,
            });
        }

        let record = self.new_record(&repo, readme.as_deref()).await;
        let title = record.title.clone();
        records.insert(0, record);
        self.store
            .write(&mut records)
            .await
            .context("writing project collection")?;
        info!(repo = %repo.full_name, %title, "project added");
        Ok(IncrementalOutcome::Added {
            name: repo.name,
            title,
        })
    }
}
