use crate::{
    config::{Config, User},
    crypto::FileCipher,
    errors::{AppError, AppResult},
    files::{
        self,
        inspect::{DirEntry, Inspector},
        storage,
        units::{format_size, SizeUnits},
    },
    security::{self, RateLimiters},
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use serde_with::{base64::Base64, serde_as};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub cipher: Option<Arc<FileCipher>>,
    pub rls: RateLimiters,
}

impl AppState {
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let cipher = match &cfg.encryption {
            Some(enc) => Some(Arc::new(FileCipher::from_base64(&enc.key_b64)?)),
            None => None,
        };
        Ok(Self {
            rls: RateLimiters::from_limits(&cfg.limits),
            cfg: Arc::new(cfg),
            cipher,
        })
    }
}

pub async fn serve(cfg: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    let shared = AppState::new(cfg)?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, encryption = shared.cipher.is_some(), "coffer listening");
    serve_on(listener, shared).await
}

pub async fn serve_on(listener: tokio::net::TcpListener, shared: AppState) -> anyhow::Result<()> {
    let app = build_router(shared);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}

pub fn build_router(shared: AppState) -> Router {
    let limit_bytes = shared.cfg.limits.max_request_kb * 1024;
    let cors = cors_layer(&shared.cfg.auth.allowed_origins);
    let router = Router::new()
        .route("/ping", get(ping))
        .route("/version", get(version))
        .route("/whoami", get(whoami))
        .route("/list-dir", get(list_dir))
        .route("/recursive-list-dir", get(recursive_list_dir))
        .route("/get-file/*path", get(get_file))
        .route(
            "/create-file/*path",
            post(create_file).layer(RequestBodyLimitLayer::new(limit_bytes)),
        )
        .route("/create-dir/*path", post(create_dir))
        .route("/delete-item/*path", delete(delete_item))
        .layer(TraceLayer::new_for_http())
        .with_state(shared);
    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring unparsable origin");
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "present_flag")]
    pub alternate_units: bool,
    #[serde(default, deserialize_with = "present_flag")]
    pub flat: bool,
}

/// Any non-empty query value switches a flag on, `?flat=1` and `?flat=true`
/// alike.
fn present_flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(de)?;
    Ok(!raw.is_empty())
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentBody {
    #[serde_as(as = "Base64")]
    pub content: Vec<u8>,
}

/// One authenticated request, audited when it completes.
struct Call {
    request_id: String,
    op: &'static str,
    started: Instant,
    username: Option<String>,
    bytes: u64,
}

impl Call {
    fn begin(op: &'static str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            op,
            started: Instant::now(),
            username: None,
            bytes: 0,
        }
    }

    fn authorize(&mut self, state: &AppState, headers: &HeaderMap) -> AppResult<User> {
        let user = security::authenticate(headers, &state.cfg.auth.users)?.clone();
        self.username = Some(user.username.clone());
        state.rls.check(&user.username)?;
        Ok(user)
    }

    fn finish<T: IntoResponse>(self, result: AppResult<T>) -> Response {
        let (decision, code) = match &result {
            Ok(_) => ("allow", "OK"),
            Err(e @ (AppError::Unauthorized | AppError::RateLimited | AppError::PathOutsideRoot | AppError::Forbidden)) => {
                ("deny", e.code())
            }
            Err(e) => ("error", e.code()),
        };
        if let Err(AppError::Internal(msg)) = &result {
            tracing::error!(request_id = %self.request_id, op = self.op, error = %msg, "request failed");
        }
        tracing::info!(
            request_id = %self.request_id,
            op = self.op,
            user = self.username.as_deref().unwrap_or(""),
            decision = decision,
            code = code,
            duration_ms = self.started.elapsed().as_millis() as u64,
            bytes = self.bytes,
            "audit"
        );
        match result {
            Ok(body) => body.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// Canonical user root and the confined target beneath it.
fn confined(state: &AppState, user: &User, relative: &str) -> AppResult<(PathBuf, PathBuf)> {
    let root = state.cfg.user_root(&user.username);
    let path = files::confine(&root, relative)?;
    let root = dunce::canonicalize(&root).map_err(AppError::from_io)?;
    Ok((root, path))
}

async fn ping() -> Json<Value> {
    Json(json!({"content": "pong"}))
}

async fn version() -> Json<Value> {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut call = Call::begin("whoami");
    let result = usage(&mut call, &state, &headers).await;
    call.finish(result)
}

async fn usage(call: &mut Call, state: &AppState, headers: &HeaderMap) -> AppResult<Json<Value>> {
    let user = call.authorize(state, headers)?;
    let (root, _) = confined(state, &user, "")?;
    let inspector = Inspector::new(&root, &state.cfg.listing, SizeUnits::Si);
    let used = tokio::task::spawn_blocking(move || inspector.size_of(&root)).await?;
    Ok(Json(json!({
        "username": user.username,
        "used": used,
        "used_display": format_size(used, state.cfg.listing.decimal_places, SizeUnits::Si),
    })))
}

async fn list_dir(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    let mut call = Call::begin("list_dir");
    let result = list(&mut call, &state, &headers, q, false).await;
    call.finish(result)
}

async fn recursive_list_dir(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    let mut call = Call::begin("recursive_list_dir");
    let result = list(&mut call, &state, &headers, q, true).await;
    call.finish(result)
}

async fn list(
    call: &mut Call,
    state: &AppState,
    headers: &HeaderMap,
    q: ListQuery,
    recursive: bool,
) -> AppResult<Json<Value>> {
    let user = call.authorize(state, headers)?;
    let (root, path) = confined(state, &user, &q.path)?;
    let inspector = Inspector::new(&root, &state.cfg.listing, SizeUnits::from_flag(q.alternate_units));
    let entries = tokio::task::spawn_blocking(move || {
        if recursive {
            inspector.list_all(&path)
        } else {
            inspector.list_one_level(&path)
        }
    })
    .await?
    .map_err(|e| AppError::Internal(e.to_string()))?
    .ok_or(AppError::NotFound)?;
    if recursive && q.flat {
        return Ok(Json(json!({"content": DirEntry::file_paths(&entries)})));
    }
    Ok(Json(json!({"content": entries})))
}

async fn get_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(relative): Path<String>,
) -> Response {
    let mut call = Call::begin("get_file");
    let result = read(&mut call, &state, &headers, &relative).await;
    call.finish(result)
}

async fn read(call: &mut Call, state: &AppState, headers: &HeaderMap, relative: &str) -> AppResult<Json<ContentBody>> {
    let user = call.authorize(state, headers)?;
    let (_, path) = confined(state, &user, relative)?;
    let stored = tokio::task::spawn_blocking(move || storage::read_file(&path)).await??;
    let content = match &state.cipher {
        Some(cipher) => cipher.decrypt(&stored)?,
        None => stored,
    };
    call.bytes = content.len() as u64;
    Ok(Json(ContentBody { content }))
}

async fn create_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(relative): Path<String>,
    body: Result<Json<ContentBody>, JsonRejection>,
) -> Response {
    let mut call = Call::begin("create_file");
    let result = write(&mut call, &state, &headers, &relative, body).await;
    call.finish(result)
}

async fn write(
    call: &mut Call,
    state: &AppState,
    headers: &HeaderMap,
    relative: &str,
    body: Result<Json<ContentBody>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let user = call.authorize(state, headers)?;
    security::content_length_ok(headers, state.cfg.limits.max_request_kb)?;
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (root, path) = confined(state, &user, relative)?;
    call.bytes = body.content.len() as u64;
    let stored = match &state.cipher {
        Some(cipher) => cipher.encrypt(&body.content)?,
        None => body.content,
    };
    let rel = files::relative_of(&root, &path);
    tokio::task::spawn_blocking(move || storage::write_file(&path, &stored)).await??;
    Ok(Json(json!({"path": rel})))
}

async fn create_dir(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(relative): Path<String>,
) -> Response {
    let mut call = Call::begin("create_dir");
    let result = mkdir(&mut call, &state, &headers, &relative).await;
    call.finish(result)
}

async fn mkdir(call: &mut Call, state: &AppState, headers: &HeaderMap, relative: &str) -> AppResult<Json<Value>> {
    let user = call.authorize(state, headers)?;
    let (root, path) = confined(state, &user, relative)?;
    let rel = files::relative_of(&root, &path);
    tokio::task::spawn_blocking(move || storage::create_dir(&path)).await??;
    Ok(Json(json!({"path": rel})))
}

async fn delete_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(relative): Path<String>,
) -> Response {
    let mut call = Call::begin("delete_item");
    let result = remove(&mut call, &state, &headers, &relative).await;
    call.finish(result)
}

async fn remove(call: &mut Call, state: &AppState, headers: &HeaderMap, relative: &str) -> AppResult<Json<Value>> {
    let user = call.authorize(state, headers)?;
    let (root, _) = confined(state, &user, "")?;
    let path = files::confine_entry(&root, relative)?;
    let rel = files::relative_of(&root, &path);
    tokio::task::spawn_blocking(move || storage::delete_item(&root, &path)).await??;
    Ok(Json(json!({"path": rel})))
}
