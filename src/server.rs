//!
//! tablegate HTTP server
//! ---------------------
//! Axum routes for login/logout, the index of readable tables, and per-entity
//! list/create/edit/delete pages.
//!
//! Every protected handler builds one [`AccessRequest`] and passes the session cookie to
//! [`Enforcer::enforce`] before anything else happens. An unauthenticated caller is
//! redirected to the login page; every other failure goes through the renderer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Path, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::{error, info};

use crate::access::{AccessRequest, Action, Enforcer, PermissionMatrix};
use crate::config::GateConfig;
use crate::error::{AppError, AppResult};
use crate::gateway::{parse_record_id, RecordGateway, LIST_LIMIT};
use crate::identity::{Authenticator, LoginRequest, SessionCodec};
use crate::storage::memory::seed_demo;
use crate::storage::pool::PgPool;
use crate::storage::postgres::{PgCredentialStore, PgRecordStore};
use crate::storage::{with_timeout, CredentialStore, RecordStore};

pub mod render;

use render::{HtmlRenderer, Renderer, View};

pub const SESSION_COOKIE: &str = "tablegate_session";
const LOGIN_PATH: &str = "/auth/login";

#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    pub store_timeout: Duration,
    pub secure_cookie: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { store_timeout: Duration::from_secs(5), secure_cookie: false }
    }
}

/// Shared server state injected into all handlers. Everything in it is immutable.
#[derive(Clone)]
pub struct AppState {
    pub enforcer: Arc<Enforcer>,
    pub codec: Arc<SessionCodec>,
    pub authenticator: Arc<Authenticator>,
    pub gateway: Arc<RecordGateway>,
    pub renderer: Arc<dyn Renderer>,
    pub secure_cookie: bool,
}

impl AppState {
    pub fn new(
        matrix: Arc<PermissionMatrix>,
        codec: Arc<SessionCodec>,
        records: Arc<dyn RecordStore>,
        credentials: Arc<dyn CredentialStore>,
        settings: ServerSettings,
    ) -> Self {
        Self {
            enforcer: Arc::new(Enforcer::new(matrix, codec.clone())),
            codec,
            authenticator: Arc::new(Authenticator::new(credentials, settings.store_timeout)),
            gateway: Arc::new(RecordGateway::new(records, settings.store_timeout)),
            renderer: Arc::new(HtmlRenderer),
            secure_cookie: settings.secure_cookie,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    fn reject(&self, err: AppError) -> Response {
        match err {
            AppError::Unauthenticated { .. } => Redirect::to(LOGIN_PATH).into_response(),
            other => self.renderer.error(&other),
        }
    }

    fn finish(&self, res: AppResult<Response>) -> Response {
        res.unwrap_or_else(|e| self.reject(e))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "tablegate ok" }))
        .route("/auth/login", get(login_form).post(login))
        .route("/auth/logout", get(logout))
        .route("/", get(index))
        .route("/view/{entity}", get(view_table))
        .route("/{entity}/create", get(create_form).post(create_record))
        .route("/{entity}/edit/{id}", get(edit_form).post(edit_record))
        .route("/{entity}/delete/{id}", post(delete_record))
        .with_state(state)
}

/// Resolve configuration into stores and serve until the listener fails.
pub async fn run(config: GateConfig) -> anyhow::Result<()> {
    let matrix = Arc::new(config.load_matrix().context("loading permission matrix")?);
    let key = config.resolve_signing_key().context("resolving signing key")?;
    let codec = Arc::new(SessionCodec::new(&key, config.token_issuer.clone()));

    let (records, credentials): (Arc<dyn RecordStore>, Arc<dyn CredentialStore>) = match &config.database_url {
        Some(url) => {
            let pool = PgPool::new(url, config.pool_size, config.store_timeout).context("parsing database url")?;
            let records = PgRecordStore::new(pool.clone(), &config.provenance_table)?;
            let credentials = with_timeout(config.store_timeout, PgCredentialStore::connect(pool))
                .await
                .context("connecting credential store")?;
            info!(target: "tablegate::server", pool_size = config.pool_size, "using postgres store");
            (Arc::new(records), Arc::new(credentials))
        }
        None => {
            let (records, credentials) = seed_demo(&matrix).context("seeding demo store")?;
            info!(target: "tablegate::server", accounts = credentials.len(), "no database configured; using in-memory demo store");
            (Arc::new(records), Arc::new(credentials))
        }
    };

    info!(
        target: "tablegate::server",
        roles = matrix.roles().count(),
        entities = matrix.entities().count(),
        "permission matrix loaded"
    );

    let settings = ServerSettings { store_timeout: config.store_timeout, secure_cookie: config.secure_cookie };
    let app = router(AppState::new(matrix, codec, records, credentials, settings));

    info!(target: "tablegate::server", "listening on {}", config.http_addr);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(axum::http::header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn session_cookie(token: &str, max_age: i64, secure: bool) -> AppResult<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}{secure}"))
        .map_err(|_| AppError::internal("cookie_error", "session cookie could not be built"))
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT{secure}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("tablegate_session=; Path=/; Max-Age=0"))
}

/// Body problems are reported only after the request has passed enforcement.
fn form_values(form: Result<Form<HashMap<String, String>>, FormRejection>) -> AppResult<HashMap<String, String>> {
    form.map(|Form(values)| values)
        .map_err(|e| AppError::Validation { code: "bad_form".into(), message: e.body_text() })
}

fn view_path(entity: &str) -> String {
    format!("/view/{entity}")
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

async fn login_form(State(state): State<AppState>) -> Response {
    state.renderer.render(StatusCode::OK, &View::Login { error: None })
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let req = LoginRequest { login: form.login, password: form.password };
    let res: AppResult<Response> = async {
        match state.authenticator.login(&state.codec, &req).await? {
            Some(session) => {
                let cookie = session_cookie(&session.token, state.codec.ttl_secs(), state.secure_cookie)?;
                Ok(([(SET_COOKIE, cookie)], Redirect::to("/")).into_response())
            }
            None => {
                info!(target: "tablegate::auth", login = %req.login, "login failed");
                let view = View::Login { error: Some("invalid login or password".into()) };
                Ok(state.renderer.render(StatusCode::UNAUTHORIZED, &view))
            }
        }
    }
    .await;
    if let Err(e) = &res {
        error!(target: "tablegate::auth", "login error: {e}");
    }
    state.finish(res)
}

async fn logout(State(state): State<AppState>) -> Response {
    ([(SET_COOKIE, clear_session_cookie(state.secure_cookie))], Redirect::to(LOGIN_PATH)).into_response()
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res = state.enforcer.authenticate(token.as_deref()).map_err(AppError::from).map(|identity| {
        let entities =
            state.enforcer.matrix().readable_entities(&identity.role).into_iter().map(str::to_string).collect();
        let view = View::Index { login: identity.login, role: identity.role, entities };
        state.renderer.render(StatusCode::OK, &view)
    });
    state.finish(res)
}

async fn view_table(State(state): State<AppState>, headers: HeaderMap, Path(entity): Path<String>) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Read))?;
        let listing = state.gateway.list(&auth, LIST_LIMIT).await?;
        Ok(state.renderer.render(StatusCode::OK, &View::Table(listing)))
    }
    .await;
    state.finish(res)
}

async fn create_form(State(state): State<AppState>, headers: HeaderMap, Path(entity): Path<String>) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Create))?;
        let columns = state.gateway.create_columns(&auth).await?;
        Ok(state.renderer.render(StatusCode::OK, &View::CreateForm { entity: auth.entity().to_string(), columns }))
    }
    .await;
    state.finish(res)
}

async fn create_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(entity): Path<String>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Create))?;
        let values = form_values(form)?;
        state.gateway.create(&auth, &values).await?;
        Ok(Redirect::to(&view_path(auth.entity().as_str())).into_response())
    }
    .await;
    state.finish(res)
}

async fn edit_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Update))?;
        let pk = parse_record_id(&id)?;
        let record = state.gateway.edit_view(&auth, pk).await?;
        Ok(state.renderer.render(StatusCode::OK, &View::EditForm(record)))
    }
    .await;
    state.finish(res)
}

async fn edit_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Update))?;
        let pk = parse_record_id(&id)?;
        let values = form_values(form)?;
        state.gateway.update(&auth, pk, &values).await?;
        Ok(Redirect::to(&view_path(auth.entity().as_str())).into_response())
    }
    .await;
    state.finish(res)
}

async fn delete_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((entity, id)): Path<(String, String)>,
) -> Response {
    let token = parse_cookie(&headers, SESSION_COOKIE);
    let res: AppResult<Response> = async {
        let auth = state.enforcer.enforce(token.as_deref(), &AccessRequest::from_path(entity, Action::Delete))?;
        let pk = parse_record_id(&id)?;
        state.gateway.delete(&auth, pk).await?;
        Ok(Redirect::to(&view_path(auth.entity().as_str())).into_response())
    }
    .await;
    state.finish(res)
}
