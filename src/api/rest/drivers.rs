use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::caller::CallerIdentity;
use crate::error::AppError;
use crate::models::caller::{AccountStatus, Caller};
use crate::models::driver::{Candidate, Driver};
use crate::models::location::GeoPoint;
use crate::state::AppState;

const DEFAULT_NEARBY_LIMIT: usize = 10;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/presence", patch(update_driver_presence))
        .route("/drivers/:id/location", patch(update_driver_location))
        .route("/nearby-drivers", get(nearby_drivers))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AccountStatus,
}

#[derive(Deserialize)]
pub struct UpdatePresenceRequest {
    pub online: bool,
    pub available: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct LocationAck {
    pub applied: bool,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
    pub limit: Option<usize>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state.drivers.register(&caller, payload.name).await?;
    Ok(Json(driver))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    ensure_self_or_admin(&caller, id)?;
    Ok(Json(state.drivers.get(id).await?))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state.drivers.set_status(&caller, id, payload.status).await?;
    Ok(Json(driver))
}

async fn update_driver_presence(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePresenceRequest>,
) -> Result<Json<Driver>, AppError> {
    ensure_self(&caller, id)?;
    let driver = state
        .drivers
        .set_presence(&caller, payload.online, payload.available)
        .await?;
    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationAck>, AppError> {
    ensure_self(&caller, id)?;
    let applied = state
        .drivers
        .report_location(&caller, payload.location, payload.recorded_at)
        .await?;
    Ok(Json(LocationAck { applied }))
}

async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Candidate>>, AppError> {
    let candidates = state
        .matching
        .find_candidates(
            &GeoPoint::new(query.lat, query.lng),
            query.radius_m.unwrap_or(state.config.dispatch_radius_m),
            query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT),
        )
        .await?;
    Ok(Json(candidates))
}

fn ensure_self(caller: &Caller, driver_id: Uuid) -> Result<(), AppError> {
    if caller.user_id == driver_id {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "{} may not act for driver {driver_id}",
            caller.user_id
        )))
    }
}

fn ensure_self_or_admin(caller: &Caller, driver_id: Uuid) -> Result<(), AppError> {
    if caller.is_admin() {
        return Ok(());
    }
    ensure_self(caller, driver_id)
}
