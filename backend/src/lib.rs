use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use draw_core::WishItem;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod exchange;
pub mod store;

use config::Settings;
use error::{ExchangeError, ExchangeResult};
use exchange::Exchange;
use store::{ExchangeStore, MemoryStore};

/// Participant identity, issued by the external auth layer.
const PARTICIPANT_HEADER: &str = "x-participant-id";
const ADMIN_HEADER: &str = "x-admin-password";

#[derive(Clone)]
pub struct AppState {
    exchange: Arc<Exchange>,
    admin_password: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn ExchangeStore>, settings: &Settings) -> Self {
        Self {
            exchange: Arc::new(Exchange::new(store, settings)),
            admin_password: settings.admin_password.as_str().into(),
        }
    }

    /// In-memory store, snapshotted to `persist_path` when configured.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store = match &settings.persist_path {
            Some(path) => MemoryStore::with_persistence(path.clone()).await?,
            None => MemoryStore::new(),
        };
        Ok(Self::new(Arc::new(store), settings))
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &Settings::default())
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/me/profile", get(get_profile).put(save_profile))
        .route("/me/wishlist", get(get_wishlist).put(save_wishlist))
        .route("/me/assignment", get(get_assignment))
        .route("/me/reveal", post(reveal))
        .route("/admin/participants", get(list_participants))
        .route("/admin/participants/:id/exclusions", put(set_exclusions))
        .route("/admin/draw", post(draw))
        .route("/admin/reset", post(reset))
        .route("/admin/status", get(status))
        .with_state(state)
}

fn participant_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PARTICIPANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let provided = headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    provided == &*state.admin_password
}

fn respond<T: Serialize>(result: ExchangeResult<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

fn unauthenticated() -> Response {
    (StatusCode::UNAUTHORIZED, "participant id required").into_response()
}

fn not_admin() -> Response {
    (StatusCode::UNAUTHORIZED, "invalid admin password").into_response()
}

#[derive(Deserialize)]
struct ProfileRequest {
    first_name: String,
    last_name: String,
}

#[derive(Deserialize)]
struct WishlistRequest {
    items: Vec<WishItem>,
}

#[derive(Serialize)]
struct WishlistResponse {
    items: Vec<WishItem>,
}

#[derive(Deserialize)]
struct ExclusionsRequest {
    excluded_ids: Vec<String>,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct ResetParams {
    #[serde(default)]
    confirm: bool,
}

async fn get_profile(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(state.exchange.get_profile(&uid).await)
}

async fn save_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ProfileRequest>,
) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(
        state
            .exchange
            .save_profile(&uid, &payload.first_name, &payload.last_name)
            .await,
    )
}

async fn get_wishlist(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(
        state
            .exchange
            .get_wishlist(&uid)
            .await
            .map(|items| WishlistResponse { items }),
    )
}

async fn save_wishlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WishlistRequest>,
) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(
        state
            .exchange
            .save_wishlist(&uid, payload.items)
            .await
            .map(|items| WishlistResponse { items }),
    )
}

async fn get_assignment(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(state.exchange.get_assignment(&uid).await)
}

async fn reveal(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(uid) = participant_id(&headers) else {
        return unauthenticated();
    };
    respond(state.exchange.reveal(&uid).await)
}

async fn list_participants(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_admin(&state, &headers) {
        return not_admin();
    }
    respond(state.exchange.list_participants().await)
}

async fn set_exclusions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ExclusionsRequest>,
) -> Response {
    if !is_admin(&state, &headers) {
        return not_admin();
    }
    respond(state.exchange.set_exclusions(&id, payload.excluded_ids).await)
}

async fn draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DrawParams>,
) -> Response {
    if !is_admin(&state, &headers) {
        return not_admin();
    }
    respond(state.exchange.draw(params.seed).await)
}

async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ResetParams>,
) -> Response {
    if !is_admin(&state, &headers) {
        return not_admin();
    }
    if !params.confirm {
        return ExchangeError::InvalidInput(
            "reset deletes every pairing; pass confirm=true".into(),
        )
        .into_response();
    }
    respond(state.exchange.reset().await)
}

async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_admin(&state, &headers) {
        return not_admin();
    }
    respond(state.exchange.status().await)
}
