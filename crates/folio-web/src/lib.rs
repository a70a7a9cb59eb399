//! Webhook receiver that turns signed GitHub events into incremental syncs.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use folio_sync::{
    maybe_build_scheduler, ConfigError, IncrementalOutcome, SyncConfig, SyncPipeline,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "folio-web";

const DEFAULT_PORT: u16 = 8000;
const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// `repository` event actions that can change what the portfolio shows.
const SYNCED_REPOSITORY_ACTIONS: &[&str] =
    &["created", "edited", "renamed", "publicized", "unarchived"];

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait IncrementalSyncer: Send + Sync {
    async fn sync_repository(&self, full_name: &str) -> Result<IncrementalOutcome>;
}

#[async_trait]
impl IncrementalSyncer for SyncPipeline {
    async fn sync_repository(&self, full_name: &str) -> Result<IncrementalOutcome> {
        self.run_incremental_sync(full_name).await
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub secret: String,
    pub port: u16,
    pub default_branch: String,
}

impl WebConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = lookup("FOLIO_WEBHOOK_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("FOLIO_WEBHOOK_SECRET"))?;
        let port = match lookup("FOLIO_WEB_PORT").map(|v| v.trim().to_string()) {
            Some(raw) if !raw.is_empty() => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "FOLIO_WEB_PORT",
                value: raw,
            })?,
            _ => DEFAULT_PORT,
        };
        Ok(Self {
            secret,
            port,
            default_branch: lookup("FOLIO_DEFAULT_BRANCH")
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| "main".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub secret: String,
    pub default_branch: String,
    pub syncer: Arc<dyn IncrementalSyncer>,
    /// Held for the duration of every pipeline call.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        secret: impl Into<String>,
        default_branch: impl Into<String>,
        syncer: Arc<dyn IncrementalSyncer>,
        run_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            secret: secret.into(),
            default_branch: default_branch.into(),
            syncer,
            run_lock,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/webhook", post(webhook_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> Result<()> {
    let web = WebConfig::from_env().context("loading webhook configuration")?;
    let sync_config = SyncConfig::from_env().context("loading sync configuration")?;
    let pipeline = Arc::new(SyncPipeline::new(sync_config)?);
    let run_lock = Arc::new(Mutex::new(()));

    let scheduler = maybe_build_scheduler(Arc::clone(&pipeline), Arc::clone(&run_lock)).await?;
    if let Some(sched) = &scheduler {
        sched
            .start()
            .await
            .map_err(|err| anyhow::anyhow!("starting scheduler: {err:?}"))?;
        info!(cron = %pipeline.config().sync_cron, "scheduled full sync enabled");
    }

    let state = AppState::new(web.secret, web.default_branch, pipeline, run_lock);
    let listener = TcpListener::bind(("0.0.0.0", web.port))
        .await
        .with_context(|| format!("binding port {}", web.port))?;
    info!(port = web.port, "webhook server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// `sha256=<hex>` header value for `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of an `X-Hub-Signature-256` header.
pub fn verify_signature(secret: &[u8], body: &[u8], header: Option<&str>) -> bool {
    let Some(encoded) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    action: Option<String>,
    repository: Option<PayloadRepository>,
}

#[derive(Debug, Deserialize)]
struct PayloadRepository {
    full_name: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Pong,
    Sync(String),
    Ignore(String),
    Invalid(&'static str),
}

fn dispatch(event: &str, payload: WebhookPayload, default_branch: &str) -> Dispatch {
    let repository = payload.repository.map(|r| r.full_name);
    match event {
        "ping" => Dispatch::Pong,
        "push" => {
            let target = format!("refs/heads/{default_branch}");
            if payload.git_ref.as_deref() != Some(target.as_str()) {
                return Dispatch::Ignore(format!(
                    "push to {} is not on {target}",
                    payload.git_ref.as_deref().unwrap_or("unknown ref")
                ));
            }
            repository.map_or(Dispatch::Invalid("push payload has no repository"), Dispatch::Sync)
        }
        "repository" => {
            let action = payload.action.unwrap_or_default();
            if !SYNCED_REPOSITORY_ACTIONS.contains(&action.as_str()) {
                return Dispatch::Ignore(format!("repository action `{action}` is not synced"));
            }
            repository.map_or(
                Dispatch::Invalid("repository payload has no repository"),
                Dispatch::Sync,
            )
        }
        other => Dispatch::Ignore(format!("event `{other}` is not handled")),
    }
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(state.secret.as_bytes(), &body, signature) {
        warn!("webhook rejected: bad or missing signature");
        return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let Some(event) = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(event, error = %err, "webhook payload is not valid JSON");
            return error_response(StatusCode::BAD_REQUEST, "invalid payload");
        }
    };

    match dispatch(event, payload, &state.default_branch) {
        Dispatch::Pong => Json(json!({ "status": "pong" })).into_response(),
        Dispatch::Ignore(reason) => {
            info!(event, %reason, "webhook ignored");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "ignored", "reason": reason })),
            )
                .into_response()
        }
        Dispatch::Invalid(reason) => error_response(StatusCode::BAD_REQUEST, reason),
        Dispatch::Sync(full_name) => {
            let _guard = state.run_lock.lock().await;
            match state.syncer.sync_repository(&full_name).await {
                Ok(outcome) => {
                    info!(
                        event,
                        repo = %full_name,
                        project = outcome.name(),
                        wrote = outcome.wrote_collection(),
                        "incremental sync finished"
                    );
                    Json(outcome).into_response()
                }
                Err(err) => {
                    warn!(
                        event,
                        repo = %full_name,
                        error = %format!("{err:#}"),
                        "incremental sync failed"
                    );
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
                }
            }
        }
    }
}
