use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::api::rest::caller::CallerIdentity;
use crate::engine::lifecycle::{Completion, RideOffer, RideRequest};
use crate::engine::matching::OfferPage;
use crate::engine::queue::{DispatchJob, enqueue_ride};
use crate::error::AppError;
use crate::models::fare::FareBreakdown;
use crate::models::location::GeoPoint;
use crate::models::ride::{Ride, RideStatus};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fares/estimate", post(estimate_fare))
        .route("/rides", post(request_ride).get(list_my_rides))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/start", post(start_ride))
        .route("/rides/:id/complete", post(complete_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/assign", post(assign_ride))
        .route("/rides/:id/dispatch", post(dispatch_ride))
        .route("/offers", post(offer_ride).get(list_offers))
        .route("/offers/:id/accept", post(accept_offer))
}

#[derive(Deserialize)]
pub struct EstimateRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

#[derive(Deserialize)]
pub struct ListRidesQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct OffersQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize, Default)]
pub struct DispatchRequest {
    #[serde(default)]
    pub radius_m: Option<f64>,
}

async fn estimate_fare(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<FareBreakdown>, AppError> {
    let fare = state.fares.estimate(&payload.pickup, &payload.dropoff)?;
    Ok(Json(fare))
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<RideRequest>,
) -> Result<Json<Ride>, AppError> {
    let ride = state.lifecycle.request(&caller, payload).await?;

    if state.config.auto_dispatch {
        // The ride exists either way; it can still be matched by hand.
        if let Err(err) = enqueue_ride(&state, DispatchJob::first(ride.id)) {
            warn!(ride_id = %ride.id, error = %err, "ride not queued for dispatch");
        }
    }

    Ok(Json(ride))
}

async fn offer_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Json(payload): Json<RideOffer>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.lifecycle.offer(&caller, payload).await?))
}

async fn list_my_rides(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Query(query): Query<ListRidesQuery>,
) -> Result<Json<Vec<Ride>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RideStatus>)
        .transpose()?;

    let rides = state
        .lifecycle
        .list_for_user(
            &caller,
            status,
            query.skip,
            query.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;
    Ok(Json(rides))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.lifecycle.get(&caller, id).await?))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.lifecycle.accept(&caller, id).await?))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.lifecycle.accept_offer(&caller, id).await?))
}

async fn start_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.lifecycle.start(&caller, id).await?))
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    payload: Option<Json<Completion>>,
) -> Result<Json<Ride>, AppError> {
    let completion = payload.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(state.lifecycle.complete(&caller, id, completion).await?))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<Ride>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    Ok(Json(state.lifecycle.cancel(&caller, id, request.reason).await?))
}

async fn assign_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(
        state.matching.assign(&caller, id, payload.driver_id).await?,
    ))
}

async fn dispatch_ride(
    State(state): State<Arc<AppState>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<Uuid>,
    payload: Option<Json<DispatchRequest>>,
) -> Result<Json<Option<Ride>>, AppError> {
    caller.require_admin()?;
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let radius_m = request.radius_m.unwrap_or(state.config.dispatch_radius_m);
    Ok(Json(state.matching.dispatch(id, radius_m).await?))
}

async fn list_offers(
    State(state): State<Arc<AppState>>,
    CallerIdentity(_caller): CallerIdentity,
    Query(query): Query<OffersQuery>,
) -> Result<Json<OfferPage>, AppError> {
    let page = state
        .matching
        .find_offers(
            &GeoPoint::new(query.lat, query.lng),
            query.radius_m.unwrap_or(state.config.dispatch_radius_m),
            query.skip,
            query.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;
    Ok(Json(page))
}
