pub mod error;
pub mod health;
pub mod sessions;
pub mod tasks;

use axum::http::{header, HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use sa_domain::config::CorsConfig;

use crate::auth::require_bearer_token;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors);

    let mut protected = Router::new()
        .route("/api/tasks", post(tasks::submit_task))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id", delete(sessions::delete_session))
        .route("/api/sessions/:id/events", get(sessions::session_events));

    if state.auth.is_some() {
        protected = protected.layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));
    }

    let mut router = Router::new()
        .route("/health", get(health::health))
        .merge(protected)
        .layer(cors)
        .with_state(state.clone());

    if let Some(rl) = &state.config.server.rate_limit {
        router = router.layer(build_rate_limit_layer(rl));
    }

    router
}

fn build_rate_limit_layer(
    rl: &sa_domain::config::RateLimitConfig,
) -> tower_governor::GovernorLayer<'static, tower_governor::key_extractor::PeerIpKeyExtractor> {
    use tower_governor::governor::GovernorConfigBuilder;

    let config = Box::new(
        GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second.max(1) as u64)
            .burst_size(rl.burst_size.max(1))
            .finish()
            .expect("valid rate limit configuration"),
    );
    tower_governor::GovernorLayer {
        config: Box::leak(config),
    }
}

/// Builds the CORS layer from the configured origin allowlist. Supports
/// exact origins, a bare `"*"` wildcard, and `"scheme://host:*"`
/// wildcard-port patterns (the port's remainder must be digits only, so
/// `http://localhost:3000.evil.com` cannot sneak past a `localhost:*`
/// entry).
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();
    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_string());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            exact.iter().any(|e| e.as_bytes() == origin.as_bytes())
                || wildcard_prefixes
                    .iter()
                    .any(|prefix| origin_matches_wildcard(origin_str, prefix))
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Whether `origin` matches a `"scheme://host:*"`-style wildcard prefix.
/// The remainder after the prefix must be non-empty and digits only, so
/// `http://localhost:3000.evil.com` cannot sneak past a `localhost:*` entry.
fn origin_matches_wildcard(origin: &str, prefix: &str) -> bool {
    origin
        .strip_prefix(prefix)
        .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_port_matches_any_digit_suffix() {
        assert!(origin_matches_wildcard("http://localhost:3000", "http://localhost:"));
        assert!(origin_matches_wildcard("http://localhost:1", "http://localhost:"));
    }

    #[test]
    fn wildcard_port_rejects_non_digit_suffix() {
        assert!(!origin_matches_wildcard(
            "http://localhost:3000.evil.com",
            "http://localhost:"
        ));
        assert!(!origin_matches_wildcard("http://localhost", "http://localhost:"));
    }

    #[test]
    fn wildcard_port_rejects_unrelated_origin() {
        assert!(!origin_matches_wildcard("http://evil.com:3000", "http://localhost:"));
    }
}
