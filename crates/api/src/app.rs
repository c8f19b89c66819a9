use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use chrono::Duration as TokenTtl;
use domain::services::{
    AccountPolicy, AccountService, AdminService, AdmissionController, Outbox, RecommendOptions,
    RecommendationService, TokenService, TokenSettings,
};
use domain::store::Store;
use shared::jwt::{JwtError, TokenCodec};

use crate::config::Config;
use crate::middleware::{
    auth_rate_limit, metrics_handler, metrics_middleware, trace_id, AuthRateLimiter,
};
use crate::routes::{admin, auth, events, health, referrals, tokens, users};

/// Everything a handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub tokens: TokenService,
    pub accounts: AccountService,
    pub admission: AdmissionController,
    pub admin: AdminService,
    pub recommendations: RecommendationService,
    pub rate_limiter: Option<Arc<AuthRateLimiter>>,
}

impl AppState {
    /// Wires the services over `store`, queuing side effects on `outbox`.
    pub fn new(config: Config, store: Arc<dyn Store>, outbox: Outbox) -> Result<Self, JwtError> {
        let codec =
            TokenCodec::with_leeway(&config.jwt.secret, &config.jwt.issuer, config.jwt.leeway_secs)?;

        let tokens = TokenService::new(
            Arc::clone(&store),
            codec,
            TokenSettings {
                access_ttl: TokenTtl::seconds(config.jwt.access_token_expiry_secs),
                reset_ttl: TokenTtl::seconds(config.jwt.reset_token_expiry_secs),
            },
        );

        let admission = AdmissionController::new(
            Arc::clone(&store),
            outbox.clone(),
            config.admission.threshold_property.clone(),
        );

        let accounts = AccountService::new(
            Arc::clone(&store),
            admission.clone(),
            tokens.clone(),
            outbox.clone(),
            AccountPolicy {
                email_domain: config.admission.email_domain.clone(),
            },
        );

        let admin = AdminService::new(Arc::clone(&store), admission.clone(), outbox.clone());

        let recommendations = RecommendationService::new(
            Arc::clone(&store),
            outbox,
            RecommendOptions {
                avg_acceptance: config.recommendation.avg_acceptance,
                seed: None,
            },
        );

        let rate_limiter =
            AuthRateLimiter::new(config.security.auth_rate_limit_per_minute).map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            accounts,
            admission,
            admin,
            recommendations,
            rate_limiter,
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Unauthenticated account entry points, limited per client address
    let auth_routes = Router::new()
        .route("/api/v1/signup", post(auth::signup))
        .route("/api/v1/signup/host", post(auth::host_signup))
        .route("/api/v1/login", post(auth::login))
        .route("/api/v1/password/forgot", post(auth::forgot_password))
        .route("/api/v1/password/reset", post(auth::reset_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_rate_limit,
        ));

    let token_routes = Router::new()
        .route("/api/v1/token", post(tokens::refresh))
        .route("/api/v1/token/validate", post(tokens::validate));

    // Bearer-authenticated routes; the UserAuth extractor rejects missing tokens
    let user_routes = Router::new()
        .route("/api/v1/users/me", get(users::me))
        .route("/api/v1/users/verify", post(users::verify))
        .route("/api/v1/users/verify/resend", post(users::resend_verification))
        .route("/api/v1/users/password", post(users::change_password))
        .route("/api/v1/users/me/push-token", put(users::set_push_token))
        .route("/api/v1/users/me/preferences", put(users::set_preferences))
        .route(
            "/api/v1/events",
            get(events::list_events).post(events::create_event),
        )
        .route("/api/v1/events/recommended", get(events::recommended))
        .route("/api/v1/events/:event_id", get(events::get_event))
        .route("/api/v1/events/:event_id/accept", post(events::accept))
        .route("/api/v1/referrals", get(referrals::list))
        .route("/api/v1/referrals/:requester_id", post(referrals::resolve));

    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/threshold",
            get(admin::get_threshold).put(admin::set_threshold),
        )
        .route("/api/v1/admin/invite", post(admin::invite))
        .route("/api/v1/admin/host-requests", get(admin::host_requests))
        .route(
            "/api/v1/admin/host-requests/:user_id/approve",
            post(admin::approve_host_request),
        )
        .route("/api/v1/admin/admins", post(admin::grant_admin))
        .route("/api/v1/admin/notifications", post(admin::broadcast));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/api/v1/affiliations", get(auth::affiliations))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(token_routes)
        .merge(user_routes)
        .merge(admin_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config.security.cors_origins))
        .with_state(state)
}
