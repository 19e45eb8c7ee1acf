use attendance_backend::services::pending_store::{PendingRequestStore, PgPendingRequestStore};
use attendance_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes, AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    // Abandoned pending requests just expire; this keeps the table from
    // accumulating them.
    {
        let store = PgPendingRequestStore::new(app_state.pool.clone());
        tokio::spawn(async move {
            loop {
                let cutoff = attendance_backend::utils::time::now() - chrono::Duration::hours(1);
                match store.purge_expired(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "swept expired OTP requests"),
                    Err(e) => tracing::error!(error = ?e, "pending request sweeper error"),
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let attendance_api = Router::new()
        .route(
            "/api/attendance/request-otp",
            post(routes::attendance::request_otp),
        )
        .route(
            "/api/attendance/verify",
            post(routes::attendance::verify_attendance),
        )
        .route(
            "/api/attendance/request/:session_id",
            delete(routes::attendance::cancel_request),
        )
        .route(
            "/api/attendance/session/:session_id",
            get(routes::attendance::session_attendance),
        )
        .route(
            "/api/attendance/history",
            get(routes::attendance::attendance_history),
        )
        .layer(axum::middleware::from_fn(
            attendance_backend::middleware::auth::require_bearer_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            attendance_backend::middleware::rate_limit::new_rps_state(config.public_rps),
            attendance_backend::middleware::rate_limit::rps_middleware,
        ));

    let app = base_routes
        .merge(attendance_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(256 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
