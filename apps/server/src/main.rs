mod alert_layer;
mod auth;
mod availability;
mod db;
mod handlers;
mod models;
mod rate_limit;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rate_limit::{
    rate_limit_account, rate_limit_admin, rate_limit_booking, rate_limit_public, RateLimiter,
};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub session_secret: String,
    pub whatsapp_phone: String,
    pub started_at: Instant,
}

/// Expired session purge interval (seconds).
const SESSION_PURGE_INTERVAL_SECS: u64 = 3600;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:dsnails.db?mode=rwc".into());
    let session_secret = std::env::var("SESSION_SECRET").expect("SESSION_SECRET must be set");

    // ── Tracing: console + optional webhook error notifications ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    let alert_webhook = std::env::var("ALERT_WEBHOOK_URL").unwrap_or_default();
    if !alert_webhook.is_empty() {
        registry
            .with(alert_layer::AlertLayer::new(alert_webhook))
            .init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let whatsapp_phone = std::env::var("SALON_WHATSAPP").unwrap_or_default();
    let webapp_url =
        std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());

    if whatsapp_phone.is_empty() {
        tracing::warn!("SALON_WHATSAPP not set — booking responses will omit the WhatsApp link");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_admin(&pool, &session_secret).await?;

    let state = Arc::new(AppState {
        db: pool,
        session_secret,
        whatsapp_phone,
        started_at: Instant::now(),
    });

    // ── Background task: purge expired sessions ──
    let purge_db = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            SESSION_PURGE_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            auth::purge_expired_sessions(&purge_db).await;
        }
    });

    // ── Rate limiter + cleanup task ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if webapp_url != "https://example.com" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (5 groups with per-group rate limits) ──

    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: read-only endpoints (no auth, 60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route("/api/availability", get(handlers::client::availability))
        .route("/api/calendar", get(handlers::client::calendar))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .layer(from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_booking,
        ));

    // 4. Account: auth + authenticated client endpoints (30 req/min)
    let account_routes = Router::new()
        .route("/api/auth/signup", post(handlers::account::signup))
        .route("/api/auth/login", post(handlers::account::login))
        .route("/api/auth/logout", post(handlers::account::logout))
        .route("/api/auth/me", get(handlers::account::me))
        .route("/api/bookings/my", get(handlers::client::my_bookings))
        .route(
            "/api/bookings/{id}",
            delete(handlers::client::cancel_booking),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_account));

    // 5. Admin: all admin endpoints (120 req/min)
    let admin_routes = Router::new()
        .route(
            "/api/admin/bookings",
            get(handlers::admin::list_bookings),
        )
        .route(
            "/api/admin/bookings/{id}/confirm",
            post(handlers::admin::confirm_booking),
        )
        .route(
            "/api/admin/bookings/{id}/complete",
            post(handlers::admin::complete_booking),
        )
        .route(
            "/api/admin/bookings/{id}/cancel",
            post(handlers::admin::cancel_booking),
        )
        .route(
            "/api/admin/working-hours",
            get(handlers::admin::list_working_hours),
        )
        .route(
            "/api/admin/working-hours/{day}",
            put(handlers::admin::update_working_hours),
        )
        .route(
            "/api/admin/vacations",
            get(handlers::admin::list_vacations),
        )
        .route(
            "/api/admin/vacations",
            post(handlers::admin::create_vacation),
        )
        .route(
            "/api/admin/vacations/{id}",
            delete(handlers::admin::delete_vacation),
        )
        .route(
            "/api/admin/blocked-days",
            get(handlers::admin::list_blocked_days),
        )
        .route(
            "/api/admin/blocked-days",
            post(handlers::admin::create_blocked_day),
        )
        .route(
            "/api/admin/blocked-days/{id}",
            delete(handlers::admin::delete_blocked_day),
        )
        .route(
            "/api/admin/services",
            get(handlers::admin::list_all_services),
        )
        .route(
            "/api/admin/services",
            post(handlers::admin::create_service),
        )
        .route(
            "/api/admin/services/{id}",
            put(handlers::admin::update_service),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_admin));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("DS Nails server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
