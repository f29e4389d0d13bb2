use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use admission_core::{
    ConversationLog, ConversationLogEntry, IntentClassifier, Resolution, Resolver, ResolverConfig,
    RuleKeywordTable,
};
use admission_model::TfidfLogisticModel;

const SERVICE_CONTRACT_VERSION: &str = "admission-service.v1";

/// Shared read-only resolver plus session-scoped conversation logs. The
/// resolver is never mutated after startup; each session owns its log.
#[derive(Clone)]
struct ServiceState {
    resolver: Arc<Resolver>,
    sessions: Arc<Mutex<BTreeMap<String, ConversationLog>>>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

impl ServiceError {
    fn new(message: impl Into<String>) -> Self {
        Self { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope { service_contract_version: SERVICE_CONTRACT_VERSION, data }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    classifier_loaded: bool,
    catalog_categories: usize,
}

#[derive(Debug, Clone, Serialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryRequest {
    session_id: String,
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct QueryResponse {
    session_id: String,
    #[serde(flatten)]
    resolution: Resolution,
}

#[derive(Debug, Clone, Serialize)]
struct SessionLogResponse {
    session_id: String,
    entries: Vec<ConversationLogEntry>,
}

#[derive(Debug, Parser)]
#[command(name = "admission-service")]
#[command(about = "Multi-session HTTP variant of the admission assistant")]
struct Args {
    #[arg(long, default_value = "data/faq.csv")]
    faq_csv: PathBuf,
    #[arg(long, default_value = "data/faq.json")]
    faq_json: PathBuf,
    #[arg(long, default_value = "data/rule_keywords.yaml")]
    rules: PathBuf,
    #[arg(long, default_value = "model/intent_model.json")]
    model: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

fn build_resolver(args: &Args) -> Resolver {
    let records = match admission_store::load_faq_records(&args.faq_csv, &args.faq_json) {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!("FAQ source unavailable, continuing with reduced capability: {err}");
            Vec::new()
        }
    };
    let rules = match admission_store::load_rule_table_or_default(&args.rules) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::warn!("rule table unreadable, using built-in defaults: {err}");
            RuleKeywordTable::default()
        }
    };
    let classifier = match TfidfLogisticModel::load(&args.model) {
        Ok(model) => Some(Box::new(model) as Box<dyn IntentClassifier + Send + Sync>),
        Err(err) => {
            tracing::warn!("classifier artifact failed to load, using fallback mode: {err}");
            None
        }
    };
    Resolver::new(records, rules, classifier, ResolverConfig::default())
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/session", post(session_create))
        .route("/v1/query", post(query))
        .route("/v1/session/:session_id/log", get(session_log))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let state = ServiceState {
        resolver: Arc::new(build_resolver(&args)),
        sessions: Arc::new(Mutex::new(BTreeMap::new())),
    };
    tracing::info!("listening on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse {
        status: "ok",
        classifier_loaded: state.resolver.has_classifier(),
        catalog_categories: state.resolver.catalog().len(),
    }))
}

async fn session_create(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SessionCreated>>, ServiceError> {
    let session_id = Ulid::new().to_string();
    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| ServiceError::new("session store is unavailable"))?;
    sessions.insert(session_id.clone(), ConversationLog::new());
    Ok(Json(envelope(SessionCreated { session_id })))
}

async fn query(
    State(state): State<ServiceState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<ServiceEnvelope<QueryResponse>>, ServiceError> {
    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| ServiceError::new("session store is unavailable"))?;
    let Some(log) = sessions.get_mut(&request.session_id) else {
        return Err(ServiceError::new(format!("unknown session: {}", request.session_id)));
    };
    let resolution = state.resolver.process_query(log, &request.text);
    tracing::debug!(
        session = %request.session_id,
        state = %resolution.state,
        "query resolved"
    );
    Ok(Json(envelope(QueryResponse { session_id: request.session_id, resolution })))
}

async fn session_log(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
) -> Result<Json<ServiceEnvelope<SessionLogResponse>>, ServiceError> {
    let sessions = state
        .sessions
        .lock()
        .map_err(|_| ServiceError::new("session store is unavailable"))?;
    let Some(log) = sessions.get(&session_id) else {
        return Err(ServiceError::new(format!("unknown session: {session_id}")));
    };
    Ok(Json(envelope(SessionLogResponse { session_id, entries: log.entries().to_vec() })))
}
