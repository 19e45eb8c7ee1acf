pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::attendance_service::AttendanceService;
use crate::services::otp_service::OtpIssuer;
use crate::services::pending_store::PgPendingRequestStore;
use crate::services::proximity_service::ProximityPolicy;
use crate::services::session_service::SessionService;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub session_service: SessionService,
    pub attendance_service: AttendanceService<PgPendingRequestStore>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();

        let session_service = SessionService::new(pool.clone());
        let attendance_service = AttendanceService::new(
            pool.clone(),
            PgPendingRequestStore::new(pool.clone()),
            OtpIssuer::new(config.otp_secret.clone(), config.otp_ttl_seconds),
            ProximityPolicy::from_config(config),
            config.otp_max_attempts,
            config.early_open_minutes,
        );

        Self {
            pool,
            session_service,
            attendance_service,
        }
    }
}
