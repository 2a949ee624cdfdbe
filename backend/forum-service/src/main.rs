use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

use forum_service::config::Config;
use forum_service::metrics;
use forum_service::repository::{PgDatabase, PgIdentityProvider};
use forum_service::AttitudeService;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn health(db: web::Data<PgDatabase>) -> impl Responder {
    match db.ping().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })),
        Err(e) => {
            error!(error = %e, "Health check failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "unavailable" }))
        }
    }
}

async fn metrics_endpoint() -> impl Responder {
    match metrics::render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().body(format!("error: {}", e)),
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    // Local .env is optional
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!(
        env = %config.app.env,
        http_port = config.app.http_port,
        conflict_retries = config.attitude.conflict_retries,
        "Starting forum-service"
    );

    let connect_options = PgConnectOptions::from_str(&config.database.url)
        .context("Failed to parse DATABASE_URL")?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let database = PgDatabase::new(pg_pool.clone());
    database
        .ping()
        .await
        .context("Failed to verify database connection")?;
    info!("Database pool created and verified");

    let attitude_service = AttitudeService::new(
        Arc::new(database.clone()),
        Arc::new(PgIdentityProvider::new(pg_pool)),
        config.service_settings(),
    );
    info!("Attitude service initialized");

    let bind_addr = format!("{}:{}", config.app.host, config.app.http_port);
    info!(%bind_addr, "Serving health and metrics");

    let db_data = web::Data::new(database);
    let service_data = web::Data::new(attitude_service);
    HttpServer::new(move || {
        App::new()
            .app_data(db_data.clone())
            .app_data(service_data.clone())
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server failed")?;

    info!("forum-service stopped");
    Ok(())
}
