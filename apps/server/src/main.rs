mod alerts;
mod auth;
mod availability;
mod booking;
mod calendar;
mod db;
mod delivery;
mod error;
mod gateway;
mod handlers;
mod mirror;
mod models;
mod notify;
mod rate_limit;
mod reconcile;
mod scheduler;
#[cfg(test)]
mod testutil;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gateway::{Gateway, YooKassaClient};
use mirror::{Mirror, SheetsMirror};
use notify::{Notifier, TelegramNotifier};
use rate_limit::{rate_limit, RateLimitConfig, RateLimiter};

/// Runtime configuration, read once from the environment.
pub struct AppConfig {
    pub bot_token: String,
    pub admin_tg_id: i64,
    /// Deposit price in RUB.
    pub deposit_amount: i64,
    /// Final payment price in RUB.
    pub final_amount: i64,
    /// MSK hour at which the daily final-payment reminder fires.
    pub reminder_hour: u32,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub pool: sqlx::SqlitePool,
    pub cfg: AppConfig,
    pub gateway: Gateway,
    pub mirror: Mirror,
    pub notifier: Notifier,
    pub started_at: Instant,
}

const DEFAULT_DEPOSIT_AMOUNT: i64 = 4000;
const DEFAULT_FINAL_AMOUNT: i64 = 11000;
const DEFAULT_REMINDER_HOUR: u32 = 12;

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars (read before tracing so AlertLayer can use them) ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:dayone.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .expect("ADMIN_TG_ID must be set")
        .parse()
        .expect("ADMIN_TG_ID must be a number");

    // ── Tracing: console + Telegram error alerts for the operator ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !bot_token.is_empty() {
        let alert_layer = alerts::AlertLayer::new(bot_token.clone(), admin_tg_id);
        registry.with(alert_layer).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let yookassa_shop_id = std::env::var("YOOKASSA_SHOP_ID").unwrap_or_default();
    let yookassa_secret_key = std::env::var("YOOKASSA_SECRET_KEY").unwrap_or_default();
    let return_url =
        std::env::var("PAYMENT_RETURN_URL").unwrap_or_else(|_| "https://t.me".into());
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());
    let spreadsheet_id = std::env::var("SHEETS_SPREADSHEET_ID").unwrap_or_default();
    let sheets_token = std::env::var("SHEETS_ACCESS_TOKEN").unwrap_or_default();

    if yookassa_shop_id.is_empty() {
        tracing::warn!("YOOKASSA_SHOP_ID not set — payments will fail");
    }

    let cfg = AppConfig {
        bot_token: bot_token.clone(),
        admin_tg_id,
        deposit_amount: env_i64("DEPOSIT_AMOUNT", DEFAULT_DEPOSIT_AMOUNT),
        final_amount: env_i64("FINAL_AMOUNT", DEFAULT_FINAL_AMOUNT),
        reminder_hour: env_i64("REMINDER_HOUR", DEFAULT_REMINDER_HOUR as i64) as u32,
    };

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;
    let seeded = calendar::initialize_work_days(&pool, calendar::msk_today()).await?;
    if seeded > 0 {
        tracing::info!("Seeded calendar with {} work days", seeded);
    }

    // ── Collaborators ──
    let mirror = if spreadsheet_id.is_empty() {
        tracing::warn!("SHEETS_SPREADSHEET_ID not set — running without the mirror");
        Mirror::Disabled
    } else {
        Mirror::Sheets(SheetsMirror::new(spreadsheet_id, sheets_token))
    };
    let state = Arc::new(AppState {
        pool,
        gateway: Gateway::YooKassa(YooKassaClient::new(
            yookassa_shop_id,
            yookassa_secret_key,
            return_url,
        )),
        mirror,
        notifier: Notifier::Telegram(TelegramNotifier::new(bot_token, admin_tg_id)),
        cfg,
        started_at: Instant::now(),
    });

    // ── Background loops: daily reminder + payment poll ──
    scheduler::spawn_reminder_loop(state.clone());
    scheduler::spawn_payment_poll(state.clone());

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();
    rate_limiter.add_tier(
        "public",
        RateLimitConfig {
            max_requests: 60,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "auth",
        RateLimitConfig {
            max_requests: 30,
            window: Duration::from_secs(60),
        },
    );
    rate_limiter.add_tier(
        "booking",
        RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(300),
        },
    );
    rate_limiter.add_tier(
        "admin",
        RateLimitConfig {
            max_requests: 120,
            window: Duration::from_secs(60),
        },
    );

    // ── Background task: cleanup stale rate limit entries ──
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

    // ── Router (per-group rate limits) ──

    // 1. No-limit: health checks + payment webhooks
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/payments/webhook",
            post(handlers::webhook::payment_webhook),
        );

    // 2. Public: read-only endpoints (no auth, 60 req/min)
    let public_routes = Router::new()
        .route("/api/dates", get(handlers::client::list_dates))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "public"),
            rate_limit,
        ));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::reserve))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "booking"),
            rate_limit,
        ));

    // 4. Auth: authenticated client endpoints (30 req/min)
    let auth_routes = Router::new()
        .route("/api/bookings/my", get(handlers::client::my_bookings))
        .route(
            "/api/bookings/current",
            delete(handlers::client::cancel_current),
        )
        .route(
            "/api/bookings/final-payment",
            post(handlers::client::request_final_payment),
        )
        .route("/api/brief/complete", post(handlers::client::complete_brief))
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "auth"),
            rate_limit,
        ));

    // 5. Admin: all admin endpoints (120 req/min)
    let admin_routes = Router::new()
        .route("/api/admin/workdays", get(handlers::admin::list_workdays))
        .route("/api/admin/workdays", post(handlers::admin::add_workday))
        .route(
            "/api/admin/workdays",
            delete(handlers::admin::remove_workday),
        )
        .route(
            "/api/admin/workdays/month",
            post(handlers::admin::expand_month),
        )
        .route("/api/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/delivery",
            post(handlers::admin::deliver_part),
        )
        .route(
            "/api/admin/payments/{payment_id}/refund",
            post(handlers::admin::refund_payment),
        )
        .layer(from_fn_with_state(
            (rate_limiter.clone(), "admin"),
            rate_limit,
        ));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Dayone server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
