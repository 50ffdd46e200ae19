use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod branching;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // Respondents reach the take flow from arbitrary origins (shared survey
    // links), so the public routes are fully CORS-open.
    let take_cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Respondent-facing take flow (public, rate limited per IP)
        .nest(
            "/api/v1/take",
            take_routes()
                .layer(take_cors)
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::take_rate_limit_middleware,
                )),
        )
        // Authoring endpoints
        .merge(
            surveys_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::rate_limit::authoring_rate_limit_middleware,
            )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn take_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/{secret_key}/start", post(handlers::take::start_take))
        .route("/{secret_key}/consent", post(handlers::take::confirm_consent))
        .route("/{secret_key}/answers", post(handlers::take::submit_answer))
        .route("/{secret_key}/back", post(handlers::take::step_back))
        .route("/{secret_key}/finalize", post(handlers::take::finalize))
        .route("/{secret_key}/abandon", post(handlers::take::abandon))
}

fn surveys_routes() -> Router<std::sync::Arc<services::AppState>> {
    // NOTE: axum 0.8's `nest("/api/v1/surveys", route("/", ..))` matches the
    // prefix without a trailing slash, so the collection endpoint must be
    // registered with its absolute path (including the trailing slash) and
    // merged rather than nested.
    Router::new()
        .route("/api/v1/surveys/", post(handlers::surveys::create_survey))
        .route("/api/v1/surveys/{id}", get(handlers::surveys::get_survey))
        .route(
            "/api/v1/surveys/{id}/questions",
            get(handlers::surveys::get_questions).put(handlers::surveys::put_questions),
        )
        .route(
            "/api/v1/surveys/{id}/status",
            post(handlers::surveys::set_status),
        )
        .route(
            "/api/v1/surveys/{id}/insights",
            get(handlers::surveys::get_insights),
        )
}
