//! Portfolio sync orchestration: discovery, relevance filtering, enhancement,
//! duplicate resolution and persistence of the project collection.

pub mod classify;
pub mod dedup;
pub mod enhance;
pub mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use folio_adapters::llm::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_IMAGE_MODEL};
use folio_adapters::github::DEFAULT_API_BASE;
use folio_core::DedupConfig;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use classify::{heuristic_verdict, RelevanceClassifier, RelevanceRules};
pub use dedup::{fallback_verdict, retention_order, DuplicateResolver, Resolution};
pub use enhance::{fallback_enhancement, Enhancer};
pub use pipeline::{is_documentation_only, IncrementalOutcome, SyncPipeline, SyncSummary};

pub const CRATE_NAME: &str = "folio-sync";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {var} has invalid value `{value}`")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub owner: String,
    pub orgs: Vec<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub openai_api_key: Option<String>,
    pub llm_base_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub generate_images: bool,
    pub data_file: PathBuf,
    pub images_dir: PathBuf,
    pub images_url_prefix: String,
    pub rules_file: PathBuf,
    pub locale: String,
    pub request_delay: Duration,
    pub page_delay: Duration,
    pub dedup_call_delay: Duration,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub dedup: DedupConfig,
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(value) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let owner = non_empty(lookup("GITHUB_USERNAME"))
            .ok_or(ConfigError::Missing("GITHUB_USERNAME"))?;
        let mut config = Self::for_owner(owner);

        config.orgs = lookup("GITHUB_ORGS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|org| !org.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        config.github_token = non_empty(lookup("GITHUB_TOKEN"));
        if let Some(url) = non_empty(lookup("GITHUB_API_URL")) {
            config.github_api_url = url;
        }
        config.openai_api_key = non_empty(lookup("OPENAI_API_KEY"));
        if let Some(url) = non_empty(lookup("FOLIO_LLM_BASE_URL")) {
            config.llm_base_url = url;
        }
        if let Some(model) = non_empty(lookup("FOLIO_LLM_MODEL")) {
            config.chat_model = model;
        }
        if let Some(model) = non_empty(lookup("FOLIO_IMAGE_MODEL")) {
            config.image_model = model;
        }
        config.generate_images = flag(lookup("FOLIO_GENERATE_IMAGES"));
        if let Some(path) = non_empty(lookup("FOLIO_DATA_FILE")) {
            config.data_file = PathBuf::from(path);
        }
        if let Some(path) = non_empty(lookup("FOLIO_IMAGES_DIR")) {
            config.images_dir = PathBuf::from(path);
        }
        if let Some(prefix) = non_empty(lookup("FOLIO_IMAGES_URL_PREFIX")) {
            config.images_url_prefix = prefix;
        }
        if let Some(path) = non_empty(lookup("FOLIO_RULES_FILE")) {
            config.rules_file = PathBuf::from(path);
        }
        if let Some(locale) = non_empty(lookup("FOLIO_LOCALE")) {
            config.locale = locale;
        }
        config.request_delay = Duration::from_millis(parsed(
            "FOLIO_REQUEST_DELAY_MS",
            lookup("FOLIO_REQUEST_DELAY_MS"),
            300,
        )?);
        config.page_delay = Duration::from_millis(parsed(
            "FOLIO_PAGE_DELAY_MS",
            lookup("FOLIO_PAGE_DELAY_MS"),
            1000,
        )?);
        config.dedup_call_delay = Duration::from_millis(parsed(
            "FOLIO_DEDUP_DELAY_MS",
            lookup("FOLIO_DEDUP_DELAY_MS"),
            300,
        )?);
        config.http_timeout_secs = parsed(
            "FOLIO_HTTP_TIMEOUT_SECS",
            lookup("FOLIO_HTTP_TIMEOUT_SECS"),
            30,
        )?;
        config.http_max_retries = parsed(
            "FOLIO_HTTP_MAX_RETRIES",
            lookup("FOLIO_HTTP_MAX_RETRIES"),
            3,
        )?;
        if let Some(agent) = non_empty(lookup("FOLIO_USER_AGENT")) {
            config.user_agent = agent;
        }
        config.scheduler_enabled = flag(lookup("FOLIO_SCHEDULER_ENABLED"));
        if let Some(cron) = non_empty(lookup("FOLIO_SYNC_CRON")) {
            config.sync_cron = cron;
        }
        Ok(config)
    }

    /// Defaults for `owner` with no credentials and no model access.
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            orgs: Vec::new(),
            github_token: None,
            github_api_url: DEFAULT_API_BASE.to_string(),
            openai_api_key: None,
            llm_base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            generate_images: false,
            data_file: PathBuf::from("src/data/projects-data.js"),
            images_dir: PathBuf::from("public/images/projects"),
            images_url_prefix: "/images/projects".to_string(),
            rules_file: PathBuf::from("rules/relevance.yaml"),
            locale: "en".to_string(),
            request_delay: Duration::from_millis(300),
            page_delay: Duration::from_millis(1000),
            dedup_call_delay: Duration::from_millis(300),
            http_timeout_secs: 30,
            http_max_retries: 3,
            user_agent: "folio-sync/0.1".to_string(),
            scheduler_enabled: false,
            sync_cron: "0 0 6 * * *".to_string(),
            dedup: DedupConfig::default(),
        }
    }
}

pub async fn run_full_sync_from_env() -> Result<SyncSummary> {
    let config = SyncConfig::from_env().context("loading sync configuration")?;
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_full_sync().await
}

pub async fn run_incremental_sync_from_env(full_name: &str) -> Result<IncrementalOutcome> {
    let config = SyncConfig::from_env().context("loading sync configuration")?;
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_incremental_sync(full_name).await
}

/// Scheduled full sync, when enabled. Runs share `run_lock` with webhook
/// triggered syncs so only one pipeline call touches the data file at a time.
pub async fn maybe_build_scheduler(
    pipeline: Arc<SyncPipeline>,
    run_lock: Arc<Mutex<()>>,
) -> Result<Option<JobScheduler>> {
    let config = pipeline.config();
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.clone();
    let job = Job::new_async(&cron, move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        let run_lock = Arc::clone(&run_lock);
        Box::pin(async move {
            let _guard = run_lock.lock().await;
            match pipeline.run_full_sync().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    total = summary.total,
                    duplicates_removed = summary.duplicates_removed,
                    "scheduled full sync finished"
                ),
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled full sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use folio_adapters::{RepositorySource, SourceError};
    use folio_core::CandidateRepository;
    use std::collections::{BTreeMap, HashMap};

    struct EmptySource;

    #[async_trait]
    impl RepositorySource for EmptySource {
        async fn discover(
            &self,
            _owner: &str,
            _orgs: &[String],
        ) -> Result<Vec<CandidateRepository>, SourceError> {
            Ok(Vec::new())
        }

        async fn get_repository(
            &self,
            full_name: &str,
        ) -> Result<CandidateRepository, SourceError> {
            Err(SourceError::InvalidIdentifier(full_name.into()))
        }

        async fn get_languages(
            &self,
            _full_name: &str,
        ) -> Result<BTreeMap<String, u64>, SourceError> {
            Ok(BTreeMap::new())
        }

        async fn get_readme(&self, _full_name: &str) -> Result<Option<String>, SourceError> {
            Ok(None)
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn owner_is_required() {
        let err = SyncConfig::from_lookup(lookup(&[("GITHUB_TOKEN", "t")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("GITHUB_USERNAME"));
    }

    #[test]
    fn defaults_apply_without_optional_vars() {
        let config = SyncConfig::from_lookup(lookup(&[("GITHUB_USERNAME", "dev")])).unwrap();
        assert_eq!(config.owner, "dev");
        assert!(config.orgs.is_empty());
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.data_file, PathBuf::from("src/data/projects-data.js"));
        assert_eq!(config.request_delay, Duration::from_millis(300));
        assert_eq!(config.sync_cron, "0 0 6 * * *");
        assert!(!config.scheduler_enabled);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("GITHUB_USERNAME", "dev"),
            ("GITHUB_ORGS", "acme, , labs "),
            ("OPENAI_API_KEY", "  "),
            ("FOLIO_GENERATE_IMAGES", "1"),
            ("FOLIO_REQUEST_DELAY_MS", "0"),
            ("FOLIO_HTTP_MAX_RETRIES", "5"),
            ("FOLIO_SCHEDULER_ENABLED", "true"),
        ]))
        .unwrap();
        assert_eq!(config.orgs, ["acme", "labs"]);
        assert!(config.openai_api_key.is_none());
        assert!(config.generate_images);
        assert_eq!(config.request_delay, Duration::ZERO);
        assert_eq!(config.http_max_retries, 5);
        assert!(config.scheduler_enabled);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[
            ("GITHUB_USERNAME", "dev"),
            ("FOLIO_PAGE_DELAY_MS", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "FOLIO_PAGE_DELAY_MS",
                value: "soon".into()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn default_cron_schedules_a_job() {
        let mut config = SyncConfig::for_owner("dev");
        config.scheduler_enabled = true;
        let pipeline = Arc::new(SyncPipeline::with_components(
            config,
            Arc::new(EmptySource),
            None,
            None,
            RelevanceRules::default(),
        ));

        let sched = maybe_build_scheduler(pipeline, Arc::new(Mutex::new(())))
            .await
            .unwrap();
        assert!(sched.is_some());
    }

    #[tokio::test]
    async fn scheduler_is_skipped_when_disabled() {
        let pipeline = Arc::new(SyncPipeline::with_components(
            SyncConfig::for_owner("dev"),
            Arc::new(EmptySource),
            None,
            None,
            RelevanceRules::default(),
        ));
        let sched = maybe_build_scheduler(pipeline, Arc::new(Mutex::new(())))
            .await
            .unwrap();
        assert!(sched.is_none());
    }
}
