use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue},
    middleware,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::error::AppError;
use crate::state::AppState;
use crate::{admin, auth, rewards};

const DEFAULT_CSP: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests";

async fn api_not_found() -> AppError {
    AppError::RouteNotFound
}

pub fn build_app(state: AppState) -> Router {
    let mut api = Router::new()
        .merge(auth::router(&state))
        .merge(rewards::router())
        .fallback(api_not_found);
    let mut admin_routes = admin::router();

    if state.config.anti_forgery.enabled {
        api = api.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf::require_anti_forgery,
        ));
        admin_routes = admin_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf::require_anti_forgery,
        ));
    }

    Router::new()
        .nest("/api", api)
        .nest("/admin", admin_routes)
        .route("/management-orders", get(admin::handlers::management_orders))
        .route("/r/:code", get(auth::handlers::referral_link))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(DEFAULT_CSP),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::users::{Role, UserPatch};

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn csrf(app: &Router) -> String {
        let resp = send(app, Request::get("/api/csrf-token").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp).await["csrfToken"].as_str().unwrap().to_string()
    }

    async fn post_json(app: &Router, uri: &str, body: Value, extra: &[(&str, String)]) -> Response {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-csrf-token", csrf(app).await);
        for (k, v) in extra {
            req = req.header(*k, v);
        }
        send(app, req.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get_auth(app: &Router, uri: &str, token: &str) -> Response {
        let req = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        send(app, req).await
    }

    async fn register(app: &Router, email: &str, cookie: Option<&str>) -> Response {
        let extra: Vec<(&str, String)> = cookie
            .map(|c| vec![("cookie", format!("partner_code={c}"))])
            .unwrap_or_default();
        post_json(
            app,
            "/api/register",
            json!({ "email": email, "password": "s3cret-pass!" }),
            &extra,
        )
        .await
    }

    async fn login(app: &Router, email: &str, password: &str) -> Response {
        post_json(
            app,
            "/api/login",
            json!({ "email": email, "password": password }),
            &[],
        )
        .await
    }

    async fn login_token(app: &Router, email: &str) -> String {
        let resp = login(app, email, "s3cret-pass!").await;
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp).await["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = build_app(AppState::fake());
        let resp = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let app = build_app(AppState::fake());
        for uri in ["/health", "/api/profile", "/api/nope"] {
            let resp = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
            let headers = resp.headers();
            assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
            assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
            let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
            assert!(csp.starts_with("default-src 'self';"));
            assert!(csp.contains("object-src 'none'"));
        }
    }

    #[tokio::test]
    async fn unknown_api_route_is_json_404() {
        let app = build_app(AppState::fake());
        let resp = send(&app, Request::get("/api/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(resp).await,
            json!({ "success": false, "message": "Route not found" })
        );
    }

    #[tokio::test]
    async fn malformed_body_is_a_validation_error() {
        let app = build_app(AppState::fake());
        register(&app, "b@example.com", None).await;
        let token = login_token(&app, "b@example.com").await;

        let resp = post_json(
            &app,
            "/api/checkout",
            json!({ "amount": "abc", "productId": "sku-1" }),
            &[("authorization", format!("Bearer {token}"))],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await,
            json!({ "success": false, "message": "Invalid request body" })
        );

        let req = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-csrf-token", csrf(&app).await)
            .body(Body::from("{not json"))
            .unwrap();
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["success"], false);
    }

    #[tokio::test]
    async fn register_login_profile_flow() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        let resp = register(&app, "  New.User@Example.com ", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert!(body.get("password").is_none() && body.get("passwordHash").is_none());

        let resp = login(&app, "new.user@example.com", "s3cret-pass!").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["user"]["email"], "new.user@example.com");
        assert_eq!(body["user"]["role"], "ROLE_CUSTOMER");
        assert_eq!(body["user"]["rewardBalance"], 0.0);
        assert!(body["user"].get("passwordHash").is_none());

        let claims = state.keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "new.user@example.com");
        assert_eq!(claims.role, Role::Customer);

        let resp = get_auth(&app, "/api/profile", &token).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["user"]["email"], "new.user@example.com");
        assert_eq!(body["user"]["referralCode"].as_str().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn registration_validation_and_conflict() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        let resp = post_json(
            &app,
            "/api/register",
            json!({ "email": "not-an-email", "password": "s3cret-pass!" }),
            &[],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = post_json(
            &app,
            "/api/register",
            json!({ "email": "a@example.com", "password": "onlyletters" }),
            &[],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(register(&app, "a@example.com", None).await.status(), StatusCode::OK);
        let resp = register(&app, "A@example.com", None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(state.users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_password_and_unknown_email_look_the_same() {
        let app = build_app(AppState::fake());
        register(&app, "a@example.com", None).await;

        let wrong = login(&app, "a@example.com", "wrong-pass!").await;
        let unknown = login(&app, "nobody@example.com", "wrong-pass!").await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(wrong).await, body_json(unknown).await);
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let app = build_app(AppState::fake());
        let resp = send(&app, Request::get("/api/profile").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = get_auth(&app, "/api/profile", "nope").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["success"], false);
    }

    #[tokio::test]
    async fn state_mutation_needs_single_use_anti_forgery_token() {
        let app = build_app(AppState::fake());
        let body = json!({ "email": "a@example.com", "password": "s3cret-pass!" }).to_string();

        let resp = send(
            &app,
            Request::post("/api/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let token = csrf(&app).await;
        let req = |t: &str| {
            Request::post("/api/register")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-csrf-token", t)
                .body(Body::from(body.clone()))
                .unwrap()
        };
        assert_eq!(send(&app, req(&token)).await.status(), StatusCode::OK);
        let replay = send(&app, req(&token)).await;
        assert_eq!(replay.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(replay).await["message"], "Invalid anti-forgery token");
    }

    #[tokio::test]
    async fn anti_forgery_can_be_disabled() {
        let app = build_app(AppState::fake_with(|c| c.anti_forgery.enabled = false));
        let resp = send(
            &app,
            Request::post("/api/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "email": "a@example.com", "password": "s3cret-pass!" }).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn checkout_credits_referrer_from_cookie() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        register(&app, "ref@example.com", None).await;
        let referrer = state.users.find_by_email("ref@example.com").await.unwrap().unwrap();

        register(&app, "buyer@example.com", Some(&referrer.referral_code)).await;
        let buyer = state.users.find_by_email("buyer@example.com").await.unwrap().unwrap();
        assert_eq!(buyer.referred_by.as_deref(), Some(referrer.referral_code.as_str()));

        let token = login_token(&app, "buyer@example.com").await;
        let resp = post_json(
            &app,
            "/api/checkout",
            json!({ "amount": 100.0, "productId": "sku-1" }),
            &[("authorization", format!("Bearer {token}"))],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["data"]["orderId"].as_str().unwrap().starts_with("ORD-"));
        assert_eq!(body["data"]["amount"], 100.0);

        let referrer = state.users.find_by_email("ref@example.com").await.unwrap().unwrap();
        assert_eq!(referrer.reward_balance, 100.0 * 0.02);
    }

    #[tokio::test]
    async fn unknown_referral_cookie_is_ignored() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        assert_eq!(register(&app, "b@example.com", Some("ABCDEF")).await.status(), StatusCode::OK);
        let b = state.users.find_by_email("b@example.com").await.unwrap().unwrap();
        assert!(b.referred_by.is_none());
    }

    #[tokio::test]
    async fn checkout_rejects_bad_amount() {
        let app = build_app(AppState::fake());
        register(&app, "b@example.com", None).await;
        let token = login_token(&app, "b@example.com").await;
        let resp = post_json(
            &app,
            "/api/checkout",
            json!({ "amount": -5.0, "productId": "sku-1" }),
            &[("authorization", format!("Bearer {token}"))],
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_routes_are_role_gated() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        register(&app, "c@example.com", None).await;
        register(&app, "boss@example.com", None).await;
        state
            .users
            .update(
                "boss@example.com",
                UserPatch {
                    role: Some(Role::Admin),
                },
            )
            .await
            .unwrap();

        let customer = login_token(&app, "c@example.com").await;
        let admin = login_token(&app, "boss@example.com").await;

        for uri in ["/admin/dashboard", "/management-orders"] {
            assert_eq!(get_auth(&app, uri, &customer).await.status(), StatusCode::FORBIDDEN);
            assert_eq!(get_auth(&app, uri, &admin).await.status(), StatusCode::OK);
        }

        let body = body_json(get_auth(&app, "/admin/dashboard", &admin).await).await;
        assert_eq!(body["data"]["totalUsers"], 2);
        assert!(!body.to_string().contains("argon2"));
    }

    async fn login_from(app: &Router, peer: SocketAddr, forwarded_for: &str) -> StatusCode {
        let mut req = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-csrf-token", csrf(app).await)
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(
                json!({ "email": "x@example.com", "password": "whatever!" }).to_string(),
            ))
            .unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        send(app, req).await.status()
    }

    #[tokio::test]
    async fn login_is_rate_limited_per_peer_despite_rotating_forwarded_for() {
        let app = build_app(AppState::fake_with(|c| c.login_rate_limit.max_attempts = 2));
        let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();

        let mut statuses = Vec::new();
        for i in 0..5 {
            statuses.push(login_from(&app, peer, &format!("198.51.100.{i}")).await);
        }
        assert_eq!(
            statuses,
            [
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
            ]
        );

        let other: SocketAddr = "192.0.2.11:40000".parse().unwrap();
        assert_eq!(login_from(&app, other, "198.51.100.0").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn trusted_proxy_keys_on_forwarded_for() {
        let app = build_app(AppState::fake_with(|c| {
            c.login_rate_limit.max_attempts = 1;
            c.login_rate_limit.trust_proxy = true;
        }));
        let proxy: SocketAddr = "10.0.0.1:443".parse().unwrap();

        assert_eq!(login_from(&app, proxy, "198.51.100.1").await, StatusCode::UNAUTHORIZED);
        assert_eq!(login_from(&app, proxy, "198.51.100.1").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(login_from(&app, proxy, "198.51.100.2").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rate_limit_response_uses_error_shape() {
        let app = build_app(AppState::fake_with(|c| c.login_rate_limit.max_attempts = 1));
        login(&app, "x@example.com", "whatever!").await;
        let resp = login(&app, "x@example.com", "whatever!").await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(resp).await["success"], false);
    }

    #[tokio::test]
    async fn referral_link_sets_cookie() {
        let app = build_app(AppState::fake());
        let resp = send(&app, Request::get("/r/abc123").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("partner_code=ABC123"));

        let resp = send(&app, Request::get("/r/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
