use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use webrank_core::persist::IndexPaths;
use webrank_core::rank::{RankConfig, RankOutcome, RankingEngine, SearchMode};
use webrank_core::semantic::Embedder;
use webrank_core::store::DocStore;
use webrank_core::DocId;

#[derive(Deserialize)]
pub struct HitsParams {
    #[serde(default)]
    pub q: String,
    /// PageRank weight; unparseable values fall back to the default rather
    /// than failing the request.
    pub w: Option<String>,
    pub mode: Option<String>,
    pub k: Option<String>,
}

const DEFAULT_WEIGHT: f32 = 0.5;
const DEFAULT_K: usize = 10;

#[derive(Serialize)]
pub struct HitEntry {
    pub doc_id: DocId,
    pub score: f32,
    pub title: String,
    pub url: String,
    pub summary: String,
}

#[derive(Serialize)]
pub struct HitsResponse {
    pub hits: Vec<HitEntry>,
    pub search_mode: &'static str,
    pub semantic_available: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub index_dir: PathBuf,
    pub engine: Arc<RwLock<Arc<RankingEngine>>>,
    pub store: Arc<RwLock<Arc<DocStore>>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub config: RankConfig,
    /// Budget for semantic/hybrid scoring; on expiry the request is
    /// re-answered in traditional mode instead of blocking.
    pub semantic_deadline: Duration,
    pub admin_token: Option<String>,
}

/// Build the query API over a published index directory.
///
/// The engine and doc store are loaded once at startup and shared read-only
/// across requests; `POST /api/v1/reload/` swaps in a freshly published
/// index without restarting.
pub fn build_app(
    index_dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    config: RankConfig,
    semantic_deadline: Duration,
) -> Result<Router> {
    let paths = IndexPaths::new(&index_dir);
    let engine = RankingEngine::open(&paths, embedder.clone(), config.clone())?;
    let store = DocStore::open(paths.doc_store())?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok();

    let state = AppState {
        index_dir,
        engine: Arc::new(RwLock::new(Arc::new(engine))),
        store: Arc::new(RwLock::new(Arc::new(store))),
        embedder,
        config,
        semantic_deadline,
        admin_token,
    };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/", get(services_handler))
        .route("/api/v1/hits/", get(hits_handler))
        .route("/api/v1/reload/", post(reload_handler))
        .with_state(state)
        .layer(cors);
    Ok(app)
}

/// GET /api/v1/ — list the available services.
async fn services_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "hits": "/api/v1/hits/",
        "url": "/api/v1/",
    }))
}

/// GET /api/v1/hits/?q=...&w=...&mode=...&k=...
///
/// Semantic and hybrid requests run under the configured deadline; when it
/// expires the query is re-answered traditionally, a degradation rather
/// than an error.
pub async fn hits_handler(
    State(state): State<AppState>,
    Query(params): Query<HitsParams>,
) -> Json<HitsResponse> {
    let query = params.q;
    let weight = params
        .w
        .as_deref()
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(DEFAULT_WEIGHT);
    let mode = SearchMode::parse(params.mode.as_deref().unwrap_or("traditional"));
    let k = params
        .k
        .as_deref()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_K)
        .clamp(1, 100);

    let engine = state.engine.read().clone();
    let outcome = rank_with_deadline(&state, engine, &query, weight, mode).await;

    let store = state.store.read().clone();
    let hits = outcome
        .hits
        .iter()
        .take(k)
        .map(|hit| {
            let meta = store.get(hit.doc_id).ok().flatten().unwrap_or_default();
            HitEntry {
                doc_id: hit.doc_id,
                score: hit.score,
                title: meta.title,
                url: meta.url,
                summary: meta.summary,
            }
        })
        .collect();

    Json(HitsResponse {
        hits,
        search_mode: outcome.mode.as_str(),
        semantic_available: outcome.semantic_available,
    })
}

async fn rank_with_deadline(
    state: &AppState,
    engine: Arc<RankingEngine>,
    query: &str,
    weight: f32,
    mode: SearchMode,
) -> RankOutcome {
    let wants_semantic = matches!(mode, SearchMode::Semantic | SearchMode::Hybrid);
    if !wants_semantic || !engine.semantic_available() {
        return engine.rank(query, weight, mode);
    }

    let worker = {
        let engine = engine.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || engine.rank(&query, weight, mode))
    };
    match tokio::time::timeout(state.semantic_deadline, worker).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => {
            tracing::warn!(error = %join_err, "semantic scoring task failed, using traditional");
            engine.rank(query, weight, SearchMode::Traditional)
        }
        Err(_) => {
            // The abandoned worker finishes its single embed-and-score pass
            // on the blocking pool and its result is dropped; the stray cost
            // is bounded at one ranking call per timed-out request.
            tracing::warn!(
                deadline_ms = state.semantic_deadline.as_millis() as u64,
                "semantic deadline expired, using traditional"
            );
            engine.rank(query, weight, SearchMode::Traditional)
        }
    }
}

/// POST /api/v1/reload/ — load a freshly published index and swap it in.
async fn reload_handler(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;

    let reload_state = state.clone();
    let loaded = tokio::task::spawn_blocking(move || -> Result<(RankingEngine, DocStore)> {
        let paths = IndexPaths::new(&reload_state.index_dir);
        let engine = RankingEngine::open(
            &paths,
            reload_state.embedder.clone(),
            reload_state.config.clone(),
        )?;
        let store = DocStore::open(paths.doc_store())?;
        Ok((engine, store))
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match loaded {
        Ok((engine, store)) => {
            let num_docs = engine.index().num_docs();
            *state.engine.write() = Arc::new(engine);
            *state.store.write() = Arc::new(store);
            tracing::info!(num_docs, "index reloaded");
            Ok(Json(serde_json::json!({ "reloaded": true, "num_docs": num_docs })))
        }
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

fn authorize(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers
        .get("X-ADMIN-TOKEN")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
