use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wayfarer_core::Departure;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartureQuery {
    pub plan_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartureView {
    #[serde(flatten)]
    pub departure: Departure,
    pub available_seats: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/departures", get(list_departures))
}

/// Upcoming bookable departures for a plan, soonest first.
async fn list_departures(
    State(state): State<AppState>,
    Query(query): Query<DepartureQuery>,
) -> Result<Json<Vec<DepartureView>>, AppError> {
    let now = Utc::now();
    let mut departures = state
        .departures
        .list_by_plan(query.plan_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    departures.retain(|d| d.is_bookable(now));
    departures.sort_by_key(|d| d.departure_date);

    Ok(Json(
        departures
            .into_iter()
            .map(|departure| DepartureView { available_seats: departure.available_seats(), departure })
            .collect(),
    ))
}
