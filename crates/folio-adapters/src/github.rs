//! GitHub-backed repository discovery.
//!
//! Candidates come from three places: repositories the owner owns,
//! repositories of tracked organizations the owner contributed to, and
//! repositories surfaced by a commit search on the owner's login.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use folio_core::similarity::{name_similarity, token_overlap};
use folio_core::{CandidateRepository, DedupConfig, PORTFOLIO_TOPIC};
use folio_storage::{FetchError, HttpFetcher};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;
const GITHUB_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/vnd.github+json"),
    ("X-GitHub-Api-Version", "2022-11-28"),
];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid repository identifier `{0}` (expected owner/repo)")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding README for {repo}: {reason}")]
    Readme { repo: String, reason: String },
}

#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Owned, organization-contributed and commit-discovered repositories,
    /// merged, filtered for inclusion and stripped of near-duplicates.
    async fn discover(
        &self,
        owner: &str,
        orgs: &[String],
    ) -> Result<Vec<CandidateRepository>, SourceError>;

    /// Single repository lookup. `contributed` is left unset; callers that
    /// know the portfolio owner decide it.
    async fn get_repository(&self, full_name: &str) -> Result<CandidateRepository, SourceError>;

    /// Language name -> bytes of code.
    async fn get_languages(&self, full_name: &str) -> Result<BTreeMap<String, u64>, SourceError>;

    /// Decoded README text; `None` when the repository has none.
    async fn get_readme(&self, full_name: &str) -> Result<Option<String>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub token: Option<String>,
    pub page_delay: Duration,
    pub max_commit_pages: usize,
    pub dedup: DedupConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            page_delay: Duration::from_secs(1),
            max_commit_pages: 3,
            dedup: DedupConfig::default(),
        }
    }
}

pub struct GitHubSource {
    http: Arc<HttpFetcher>,
    config: GitHubConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct GhOwner {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GhRepo {
    name: String,
    full_name: String,
    owner: GhOwner,
    description: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    fork: bool,
    homepage: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pushed_at: Option<DateTime<Utc>>,
}

impl GhRepo {
    fn into_candidate(self, contributed: bool) -> CandidateRepository {
        CandidateRepository {
            name: self.name,
            full_name: self.full_name,
            owner: self.owner.login,
            description: self.description.filter(|d| !d.trim().is_empty()),
            topics: self.topics,
            language: self.language,
            stars: self.stargazers_count,
            fork: self.fork,
            contributed,
            homepage: self.homepage.filter(|h| !h.trim().is_empty()),
            html_url: self.html_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
            pushed_at: self.pushed_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GhContributor {
    login: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhCommitSearch {
    #[serde(default)]
    items: Vec<GhCommitItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhCommitItem {
    repository: GhRepoRef,
}

#[derive(Debug, Clone, Deserialize)]
struct GhRepoRef {
    full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GhReadme {
    content: String,
    #[serde(default)]
    encoding: String,
}

impl GitHubSource {
    pub fn new(http: Arc<HttpFetcher>, config: GitHubConfig) -> Self {
        if config.token.is_none() {
            warn!("no GitHub token configured; running with reduced rate limits");
        }
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    /// GET a JSON array, treating an empty body (e.g. 204 on empty repos) as `[]`.
    async fn get_list<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, FetchError> {
        let resp = self
            .http
            .send(Method::GET, url, self.token(), GITHUB_HEADERS, None)
            .await?;
        if resp.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&resp.body).map_err(|source| FetchError::Decode {
            url: resp.final_url,
            source,
        })
    }

    /// Follows `page=N` until a short page. Only a failure on the first page
    /// is an error; later failures end pagination with what was collected.
    async fn paginate<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, SourceError> {
        let sep = if url.contains('?') { '&' } else { '?' };
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            if page > 1 {
                tokio::time::sleep(self.config.page_delay).await;
            }
            let page_url = format!("{url}{sep}per_page={PAGE_SIZE}&page={page}");
            match self.get_list::<T>(&page_url).await {
                Ok(items) => {
                    let count = items.len();
                    out.extend(items);
                    if count < PAGE_SIZE {
                        break;
                    }
                }
                Err(err) if page == 1 => return Err(err.into()),
                Err(err) => {
                    warn!(url, page, error = %err, "pagination stopped early");
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn fetch_repo(&self, full_name: &str) -> Result<GhRepo, SourceError> {
        let full_name = validate_full_name(full_name)?;
        let url = self.url(&format!("/repos/{full_name}"));
        Ok(self.http.get_json(&url, self.token(), GITHUB_HEADERS).await?)
    }

    async fn is_contributor(&self, full_name: &str, owner: &str) -> Result<bool, FetchError> {
        let url = self.url(&format!("/repos/{full_name}/contributors?per_page={PAGE_SIZE}"));
        let contributors: Vec<GhContributor> = self.get_list(&url).await?;
        Ok(contributors
            .iter()
            .filter_map(|c| c.login.as_deref())
            .any(|login| login.eq_ignore_ascii_case(owner)))
    }

    async fn org_contributions(
        &self,
        owner: &str,
        org: &str,
    ) -> Result<Vec<CandidateRepository>, SourceError> {
        let repos: Vec<GhRepo> = self
            .paginate(&self.url(&format!("/orgs/{org}/repos?type=all&sort=updated")))
            .await?;
        let mut out = Vec::new();
        for repo in repos {
            match self.is_contributor(&repo.full_name, owner).await {
                Ok(true) => out.push(repo.into_candidate(true)),
                Ok(false) => debug!(repo = %repo.full_name, "owner is not a contributor"),
                Err(err) => {
                    warn!(
                        repo = %repo.full_name,
                        error = %err,
                        "contributor lookup failed; skipping"
                    )
                }
            }
        }
        info!(org, count = out.len(), "collected organization contributions");
        Ok(out)
    }

    async fn commit_repositories(&self, owner: &str) -> Vec<String> {
        let mut items = Vec::new();
        for page in 1..=self.config.max_commit_pages {
            if page > 1 {
                tokio::time::sleep(self.config.page_delay).await;
            }
            let url = self.url(&format!(
                "/search/commits?q=author:{owner}&sort=author-date&order=desc\
                 &per_page={PAGE_SIZE}&page={page}"
            ));
            match self
                .http
                .get_json::<GhCommitSearch>(&url, self.token(), GITHUB_HEADERS)
                .await
            {
                Ok(result) => {
                    let count = result.items.len();
                    items.extend(result.items);
                    if count < PAGE_SIZE {
                        break;
                    }
                }
                Err(err) => {
                    warn!(page, error = %err, "commit search stopped early");
                    break;
                }
            }
        }
        extract_commit_repositories(&items)
    }
}

#[async_trait]
impl RepositorySource for GitHubSource {
    async fn discover(
        &self,
        owner: &str,
        orgs: &[String],
    ) -> Result<Vec<CandidateRepository>, SourceError> {
        let owned: Vec<GhRepo> = self
            .paginate(&self.url(&format!("/users/{owner}/repos?type=owner&sort=updated")))
            .await?;
        info!(count = owned.len(), "fetched owned repositories");
        let mut candidates: Vec<CandidateRepository> = owned
            .into_iter()
            .map(|repo| {
                let contributed = !repo.owner.login.eq_ignore_ascii_case(owner);
                repo.into_candidate(contributed)
            })
            .collect();

        for org in orgs {
            match self.org_contributions(owner, org).await {
                Ok(repos) => candidates.extend(repos),
                Err(err) => warn!(org = %org, error = %err, "skipping organization"),
            }
        }

        if self.config.token.is_some() {
            let known: HashSet<String> = candidates
                .iter()
                .map(|c| c.full_name.to_ascii_lowercase())
                .collect();
            let discovered = self.commit_repositories(owner).await;
            let mut added = 0usize;
            for full_name in discovered {
                if known.contains(&full_name.to_ascii_lowercase()) {
                    continue;
                }
                match self.fetch_repo(&full_name).await {
                    Ok(repo) => {
                        let contributed = !repo.owner.login.eq_ignore_ascii_case(owner);
                        candidates.push(repo.into_candidate(contributed));
                        added += 1;
                    }
                    Err(err) => {
                        warn!(repo = %full_name, error = %err, "repository lookup failed; skipping")
                    }
                }
            }
            info!(added, "added repositories from commit search");
        } else {
            warn!("commit search requires a GitHub token; skipping contribution discovery");
        }

        let merged = merge_candidates(candidates);
        let merged_count = merged.len();
        let included: Vec<_> = merged
            .into_iter()
            .filter(|repo| passes_inclusion_filter(repo, owner, orgs))
            .collect();
        let included_count = included.len();
        let kept = suppress_near_duplicates(included, owner, &self.config.dedup);
        info!(
            merged = merged_count,
            included = included_count,
            kept = kept.len(),
            "repository discovery complete"
        );
        Ok(kept)
    }

    async fn get_repository(&self, full_name: &str) -> Result<CandidateRepository, SourceError> {
        Ok(self.fetch_repo(full_name).await?.into_candidate(false))
    }

    async fn get_languages(&self, full_name: &str) -> Result<BTreeMap<String, u64>, SourceError> {
        let full_name = validate_full_name(full_name)?;
        let url = self.url(&format!("/repos/{full_name}/languages"));
        Ok(self.http.get_json(&url, self.token(), GITHUB_HEADERS).await?)
    }

    async fn get_readme(&self, full_name: &str) -> Result<Option<String>, SourceError> {
        let full_name = validate_full_name(full_name)?;
        let url = self.url(&format!("/repos/{full_name}/readme"));
        match self
            .http
            .get_json::<GhReadme>(&url, self.token(), GITHUB_HEADERS)
            .await
        {
            Ok(readme) => decode_readme(full_name, &readme).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_full_name(full_name: &str) -> Result<&str, SourceError> {
    let trimmed = full_name.trim().trim_matches('/');
    match trimmed.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(trimmed)
        }
        _ => Err(SourceError::InvalidIdentifier(full_name.to_string())),
    }
}

fn decode_readme(full_name: &str, readme: &GhReadme) -> Result<String, SourceError> {
    if !readme.encoding.is_empty() && readme.encoding != "base64" {
        return Ok(readme.content.clone());
    }
    let compact: String = readme
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|err| SourceError::Readme {
            repo: full_name.to_string(),
            reason: err.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_commit_repositories(items: &[GhCommitItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| item.repository.full_name.clone())
        .filter(|name| seen.insert(name.to_ascii_lowercase()))
        .collect()
}

/// First occurrence of each full name wins.
fn merge_candidates(candidates: Vec<CandidateRepository>) -> Vec<CandidateRepository> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.full_name.to_ascii_lowercase()))
        .collect()
}

pub fn passes_inclusion_filter(
    repo: &CandidateRepository,
    owner: &str,
    tracked_orgs: &[String],
) -> bool {
    if repo.has_topic(PORTFOLIO_TOPIC)
        || tracked_orgs
            .iter()
            .any(|org| repo.owner.eq_ignore_ascii_case(org))
    {
        return true;
    }
    if repo.has_description() && (!repo.fork || repo.contributed) {
        return true;
    }
    repo.is_owned_by(owner) && !repo.fork
}

pub fn is_near_duplicate(
    a: &CandidateRepository,
    b: &CandidateRepository,
    config: &DedupConfig,
) -> bool {
    if name_similarity(&a.name, &b.name) > config.prefilter_name_threshold {
        return true;
    }
    a.has_description()
        && b.has_description()
        && token_overlap(a.description_text(), b.description_text())
            > config.prefilter_description_threshold
}

fn candidate_priority(owner: &str, a: &CandidateRepository, b: &CandidateRepository) -> Ordering {
    b.is_owned_by(owner)
        .cmp(&a.is_owned_by(owner))
        .then_with(|| b.stars.cmp(&a.stars))
        .then_with(|| b.last_activity().cmp(&a.last_activity()))
}

/// Drops candidates that look like copies of a higher-priority one
/// (owned first, then stars, then recency).
pub fn suppress_near_duplicates(
    mut repos: Vec<CandidateRepository>,
    owner: &str,
    config: &DedupConfig,
) -> Vec<CandidateRepository> {
    repos.sort_by(|a, b| candidate_priority(owner, a, b));
    let mut kept: Vec<CandidateRepository> = Vec::with_capacity(repos.len());
    for repo in repos {
        if let Some(existing) = kept.iter().find(|k| is_near_duplicate(k, &repo, config)) {
            debug!(
                dropped = %repo.full_name,
                kept = %existing.full_name,
                "near-duplicate candidate"
            );
            continue;
        }
        kept.push(repo);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use folio_storage::{BackoffPolicy, HttpClientConfig};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::net::TcpListener;

    fn repo(full_name: &str, description: Option<&str>, stars: u64) -> CandidateRepository {
        let (owner, name) = full_name.split_once('/').unwrap();
        CandidateRepository {
            name: name.into(),
            full_name: full_name.into(),
            owner: owner.into(),
            description: description.map(str::to_string),
            topics: vec![],
            language: None,
            stars,
            fork: false,
            contributed: owner != "dev",
            homepage: None,
            html_url: format!("https://github.com/{full_name}"),
            created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap(),
            pushed_at: None,
        }
    }

    #[test]
    fn inclusion_filter_rules() {
        let orgs = vec!["school-org".to_string()];

        let mut tagged = repo("other/thing", None, 0);
        tagged.topics = vec!["Portfolio".into()];
        assert!(passes_inclusion_filter(&tagged, "dev", &orgs));

        assert!(passes_inclusion_filter(&repo("school-org/tp", None, 0), "dev", &orgs));
        assert!(passes_inclusion_filter(&repo("dev/bare", None, 0), "dev", &orgs));
        assert!(!passes_inclusion_filter(&repo("other/bare", None, 0), "dev", &orgs));

        let mut fork = repo("dev/forked", Some("Upstream tool"), 0);
        fork.fork = true;
        assert!(!passes_inclusion_filter(&fork, "dev", &orgs));
        fork.contributed = true;
        assert!(passes_inclusion_filter(&fork, "dev", &orgs));
    }

    #[test]
    fn suppression_prefers_owned_then_stars() {
        let config = DedupConfig::default();
        let repos = vec![
            repo("org/robot-team-3", Some("Line following robot"), 40),
            repo("dev/robot-team-1", Some("Line following robot"), 1),
            repo("dev/weather-app", Some("Forecasts for your city"), 2),
        ];
        let kept = suppress_near_duplicates(repos, "dev", &config);
        let names: Vec<_> = kept.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(names, ["dev/weather-app", "dev/robot-team-1"]);
    }

    #[test]
    fn description_overlap_collapses_renamed_copies() {
        let config = DedupConfig::default();
        let a = repo("dev/solver", Some("Sudoku solver using backtracking in C"), 3);
        let b = repo("dev/tp-final", Some("Sudoku solver using backtracking in C"), 1);
        assert!(is_near_duplicate(&a, &b, &config));
        let c = repo("dev/tp-final", Some("Chat server over websockets"), 1);
        assert!(!is_near_duplicate(&a, &c, &config));
    }

    #[test]
    fn commit_results_reduce_to_unique_repositories() {
        let items: Vec<GhCommitItem> = serde_json::from_value(serde_json::json!([
            {"repository": {"full_name": "org/a"}},
            {"repository": {"full_name": "org/b"}},
            {"repository": {"full_name": "ORG/a"}}
        ]))
        .unwrap();
        assert_eq!(extract_commit_repositories(&items), ["org/a", "org/b"]);
    }

    #[test]
    fn merge_keeps_first_occurrence() {
        let owned = repo("dev/tool", Some("owned copy"), 1);
        let discovered = repo("dev/tool", Some("discovered copy"), 1);
        let merged = merge_candidates(vec![owned, discovered]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].description_text(), "owned copy");
    }

    #[test]
    fn wire_repo_maps_to_candidate() {
        let raw = serde_json::json!({
            "name": "widget",
            "full_name": "acme/widget",
            "owner": {"login": "acme"},
            "description": "  ",
            "topics": ["c", "cmake"],
            "language": "C",
            "stargazers_count": 0,
            "fork": false,
            "homepage": "",
            "html_url": "https://github.com/acme/widget",
            "created_at": "2023-09-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "pushed_at": null
        });
        let candidate = serde_json::from_value::<GhRepo>(raw)
            .unwrap()
            .into_candidate(false);
        assert_eq!(candidate.description, None);
        assert_eq!(candidate.homepage, None);
        assert_eq!(candidate.topics, ["c", "cmake"]);
        assert!(candidate.is_owned_by("ACME"));
    }

    #[test]
    fn readme_content_is_base64_decoded() {
        let readme = GhReadme {
            content: "SGVsbG8g\nV29ybGQ=\n".into(),
            encoding: "base64".into(),
        };
        assert_eq!(decode_readme("acme/x", &readme).unwrap(), "Hello World");
    }

    #[test]
    fn identifiers_must_be_owner_slash_repo() {
        assert_eq!(validate_full_name("acme/widget").unwrap(), "acme/widget");
        assert!(validate_full_name("widget").is_err());
        assert!(validate_full_name("acme/").is_err());
        assert!(validate_full_name("a/b/c").is_err());
    }

    fn gh_repo(full_name: &str, description: Option<&str>) -> Value {
        let (owner, name) = full_name.split_once('/').unwrap();
        json!({
            "name": name,
            "full_name": full_name,
            "owner": {"login": owner},
            "description": description,
            "topics": [],
            "language": "Rust",
            "stargazers_count": 0,
            "fork": false,
            "homepage": null,
            "html_url": format!("https://github.com/{full_name}"),
            "created_at": "2023-09-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "pushed_at": null
        })
    }

    fn listing(prefix: &str, count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| gh_repo(&format!("dev/{prefix}-{i}"), None))
            .collect()
    }

    fn page_of(query: &HashMap<String, String>) -> usize {
        query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1)
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn source_for(api_base: String, token: Option<&str>) -> GitHubSource {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: Some("folio-tests".into()),
            backoff: BackoffPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .unwrap();
        GitHubSource::new(
            Arc::new(http),
            GitHubConfig {
                api_base,
                token: token.map(str::to_string),
                page_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    /// Owned listing whose `page=2` answer is chosen by `second`.
    fn owned_pages(hits: Arc<AtomicUsize>, second: Option<usize>) -> Router {
        Router::new().route(
            "/users/{owner}/repos",
            get(move |Query(query): Query<HashMap<String, String>>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, AtomicOrdering::SeqCst);
                    match (page_of(&query), second) {
                        (1, _) => Json(listing("lib", PAGE_SIZE)).into_response(),
                        (2, Some(count)) => Json(listing("extra", count)).into_response(),
                        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                    }
                }
            }),
        )
    }

    #[tokio::test]
    async fn pagination_ends_on_short_page() {
        let hits = Arc::new(AtomicUsize::new(0));
        let source = source_for(serve(owned_pages(Arc::clone(&hits), Some(3))).await, None);

        let repos: Vec<GhRepo> = source
            .paginate(&source.url("/users/dev/repos?type=owner"))
            .await
            .unwrap();
        assert_eq!(repos.len(), PAGE_SIZE + 3);
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn later_page_failure_keeps_collected_items() {
        let hits = Arc::new(AtomicUsize::new(0));
        let source = source_for(serve(owned_pages(Arc::clone(&hits), None)).await, None);

        let repos: Vec<GhRepo> = source
            .paginate(&source.url("/users/dev/repos?type=owner"))
            .await
            .unwrap();
        assert_eq!(repos.len(), PAGE_SIZE);
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_page_failure_on_owned_listing_is_fatal() {
        let router = Router::new().route(
            "/users/{owner}/repos",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let source = source_for(serve(router).await, Some("token"));

        let err = source.discover("dev", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Fetch(FetchError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn failed_org_and_contributor_lookups_are_skipped() {
        let router = Router::new()
            .route(
                "/users/{owner}/repos",
                get(|| async { Json(vec![gh_repo("dev/alpha", Some("Alpha engine"))]) }),
            )
            .route(
                "/orgs/{org}/repos",
                get(|Path(org): Path<String>| async move {
                    if org == "broken-org" {
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    Json(vec![
                        gh_repo("acme/tool", Some("Build tool")),
                        gh_repo("acme/flaky", Some("Flaky service")),
                    ])
                    .into_response()
                }),
            )
            .route(
                "/repos/{owner}/{repo}/contributors",
                get(|Path((_owner, repo)): Path<(String, String)>| async move {
                    if repo == "flaky" {
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                    Json(json!([{"login": "someone"}, {"login": "Dev"}])).into_response()
                }),
            );
        let source = source_for(serve(router).await, None);
        let orgs = vec!["broken-org".to_string(), "acme".to_string()];

        let found = source.discover("dev", &orgs).await.unwrap();
        let mut names: Vec<_> = found.iter().map(|r| r.full_name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["acme/tool", "dev/alpha"]);
        assert!(found.iter().find(|r| r.full_name == "acme/tool").unwrap().contributed);
    }

    fn commit_search_router(searches: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/users/{owner}/repos",
                get(|| async { Json(vec![gh_repo("dev/alpha", Some("Alpha engine"))]) }),
            )
            .route(
                "/search/commits",
                get(move || {
                    let searches = Arc::clone(&searches);
                    async move {
                        searches.fetch_add(1, AtomicOrdering::SeqCst);
                        Json(json!({"items": [
                            {"repository": {"full_name": "other/parser"}},
                            {"repository": {"full_name": "dev/alpha"}}
                        ]}))
                    }
                }),
            )
            .route(
                "/repos/{owner}/{repo}",
                get(|Path((owner, repo)): Path<(String, String)>| async move {
                    Json(gh_repo(&format!("{owner}/{repo}"), Some("Parser combinators")))
                }),
            )
    }

    #[tokio::test]
    async fn commit_search_requires_a_token() {
        let searches = Arc::new(AtomicUsize::new(0));
        let base = serve(commit_search_router(Arc::clone(&searches))).await;

        let anonymous = source_for(base.clone(), None).discover("dev", &[]).await.unwrap();
        assert_eq!(anonymous.len(), 1);
        assert_eq!(searches.load(AtomicOrdering::SeqCst), 0);

        let authed = source_for(base, Some("token")).discover("dev", &[]).await.unwrap();
        assert_eq!(searches.load(AtomicOrdering::SeqCst), 1);
        let parser = authed
            .iter()
            .find(|r| r.full_name == "other/parser")
            .unwrap();
        assert!(parser.contributed);
        assert_eq!(authed.len(), 2);
    }
}
