//! HTTP-level tests: session cookie flow, redirects, and CRUD through the router backed
//! by the in-memory store.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tablegate::access::{Action, PermissionMatrix};
use tablegate::identity::{Identity, SessionCodec, SigningKey, DEFAULT_ISSUER};
use tablegate::server::render::JsonRenderer;
use tablegate::server::{router, AppState, ServerSettings, SESSION_COOKIE};
use tablegate::storage::memory::{MemoryCredentialStore, MemoryStore};
use tablegate::tprintln;

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    codec: Arc<SessionCodec>,
}

impl Harness {
    fn new() -> Result<Self> {
        let codec = Arc::new(SessionCodec::new(&SigningKey::from_bytes(vec![42u8; 32])?, DEFAULT_ISSUER));
        let store = Arc::new(MemoryStore::new());
        store.create_table("repair", &["status", "cost"]);
        store.create_table("client", &["name"]);
        let mut creds = MemoryCredentialStore::new()?;
        creds.add(Identity::new(3, "tom", "technician"), "wrench")?;
        let state = AppState::new(
            Arc::new(PermissionMatrix::reference()),
            codec.clone(),
            store.clone(),
            Arc::new(creds),
            ServerSettings::default(),
        )
        .with_renderer(Arc::new(JsonRenderer));
        Ok(Self { app: router(state), store, codec })
    }

    fn token_for(&self, identity: &Identity) -> String {
        self.codec.issue(identity).unwrap()
    }

    fn tech(&self) -> String {
        self.token_for(&Identity::new(3, "tom", "technician"))
    }

    fn manager(&self) -> String {
        self.token_for(&Identity::new(1, "mia", "manager"))
    }

    async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.unwrap()
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(t) = token {
            b = b.header(header::COOKIE, format!("{SESSION_COOKIE}={t}"));
        }
        self.send(b.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, token: Option<&str>, body: &str) -> Response<Body> {
        let mut b = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(t) = token {
            b = b.header(header::COOKIE, format!("{SESSION_COOKIE}={t}"));
        }
        self.send(b.body(Body::from(body.to_string())).unwrap()).await
    }
}

async fn json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(res: &Response<Body>) -> &str {
    res.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn set_cookie(res: &Response<Body>) -> String {
    res.headers().get(header::SET_COOKIE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
}

#[tokio::test]
async fn health_needs_no_session() -> Result<()> {
    let h = Harness::new()?;
    let res = h.get("/health", None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], b"tablegate ok");
    Ok(())
}

#[tokio::test]
async fn protected_routes_redirect_without_session() -> Result<()> {
    let h = Harness::new()?;
    for uri in ["/", "/view/repair", "/repair/create", "/repair/edit/1", "/view/no_such_table"] {
        let res = h.get(uri, None).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(&res), "/auth/login", "{uri}");
    }
    let res = h.post_form("/repair/delete/1", None, "").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(h.store.provenance().is_empty());
    Ok(())
}

#[tokio::test]
async fn forged_and_expired_cookies_redirect() -> Result<()> {
    let h = Harness::new()?;
    let other = SessionCodec::new(&SigningKey::from_bytes(vec![7u8; 32])?, DEFAULT_ISSUER);
    let forged = other.issue(&Identity::new(1, "mia", "manager"))?;
    let stale = h.codec.issue_at(&Identity::new(1, "mia", "manager"), chrono::Utc::now().timestamp() - 13 * 3600)?;

    for token in [forged.as_str(), stale.as_str(), "garbage"] {
        let res = h.get("/view/repair", Some(token)).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/auth/login");
    }
    Ok(())
}

#[tokio::test]
async fn login_sets_cookie_and_failures_look_alike() -> Result<()> {
    let h = Harness::new()?;

    let res = h.get("/auth/login", None).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json(res).await["view"], "login");

    let res = h.post_form("/auth/login", None, "login=tom&password=wrench").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/");
    let cookie = set_cookie(&res);
    tprintln!("login cookie: {cookie}");
    assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));
    assert!(cookie.contains("HttpOnly"));
    let token = cookie
        .trim_start_matches(&format!("{SESSION_COOKIE}="))
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string();
    assert_eq!(h.codec.verify(&token)?.login, "tom");

    let wrong = h.post_form("/auth/login", None, "login=tom&password=hammer").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&wrong).is_empty());
    let unknown = h.post_form("/auth/login", None, "login=ghost&password=hammer").await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(wrong).await, json(unknown).await);
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie() -> Result<()> {
    let h = Harness::new()?;
    let res = h.get("/auth/logout", Some(&h.tech())).await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/auth/login");
    let cookie = set_cookie(&res);
    assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=;")));
    assert!(cookie.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn index_lists_readable_entities() -> Result<()> {
    let h = Harness::new()?;
    let body = json(h.get("/", Some(&h.tech())).await).await;
    assert_eq!(body["view"], "index");
    assert_eq!(body["role"], "technician");
    let entities: Vec<&str> = body["entities"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
    assert_eq!(entities, vec!["diagnosis", "equipment", "quality_control", "repair", "repair_request"]);
    Ok(())
}

#[tokio::test]
async fn technician_may_update_but_not_delete_repairs() -> Result<()> {
    let h = Harness::new()?;
    let tech = h.tech();

    let res = h.post_form("/repair/create", Some(&tech), "status=open&cost=").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "/view/repair");
    assert_eq!(h.store.row_count("repair"), 1);

    let res = h.post_form("/repair/edit/1", Some(&tech), "status=done").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = h.post_form("/repair/delete/1", Some(&tech), "").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(res).await["message"], "access denied");
    assert_eq!(h.store.row_count("repair"), 1);

    let log = h.store.provenance();
    let actions: Vec<Action> = log.iter().map(|p| p.action).collect();
    assert_eq!(actions, vec![Action::Create, Action::Update]);
    assert!(log.iter().all(|p| p.actor_login == "tom" && p.actor_role == "technician"));
    Ok(())
}

#[tokio::test]
async fn list_and_edit_views_show_stored_values() -> Result<()> {
    let h = Harness::new()?;
    let mgr = h.manager();
    h.post_form("/client/create", Some(&mgr), "name=Acme").await;

    let body = json(h.get("/view/client", Some(&mgr)).await).await;
    assert_eq!(body["view"], "table");
    assert_eq!(body["primary_key"], "client_id");
    assert_eq!(body["rows"][0]["name"], "Acme");

    let body = json(h.get("/client/create", Some(&mgr)).await).await;
    assert_eq!(body["view"], "create_form");
    assert_eq!(body["columns"], serde_json::json!(["name"]));

    let body = json(h.get("/client/edit/1", Some(&mgr)).await).await;
    assert_eq!(body["view"], "edit_form");
    assert_eq!(body["record"]["name"], "Acme");
    Ok(())
}

#[tokio::test]
async fn invalid_submissions_are_rejected_before_mutation() -> Result<()> {
    let h = Harness::new()?;
    let mgr = h.manager();

    let res = h.post_form("/client/create", Some(&mgr), "client_id=9&name=x").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = h.post_form("/client/create", Some(&mgr), "owner=x").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = h.post_form("/client/create", Some(&mgr), "").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = h.post_form("/client/edit/abc", Some(&mgr), "name=x").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(h.store.provenance().is_empty());

    let res = h.post_form("/client/edit/42", Some(&mgr), "name=x").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = h.post_form("/client/delete/42", Some(&mgr), "").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn unknown_entities_are_forbidden_once_signed_in() -> Result<()> {
    let h = Harness::new()?;
    let mgr = h.manager();
    for uri in ["/view/pg_shadow", "/pg_shadow/create", "/view/Repair"] {
        let res = h.get(uri, Some(&mgr)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "{uri}");
    }
    // in the matrix but absent from the store
    let res = h.get("/view/equipment", Some(&mgr)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}
