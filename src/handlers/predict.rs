use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tracing::debug;

use crate::AppState;
use boatrace_forecast::error::EngineError;
use boatrace_forecast::models::PredictRequest;

/// Predict position probabilities and ranked combinations for one race
pub async fn predict_race(
    state: web::Data<Arc<AppState>>,
    req: web::Json<PredictRequest>,
) -> Result<HttpResponse, EngineError> {
    let race = req.to_context();
    debug!("Predict request for {}", race.key);

    let top_n = req.top_n.or(state.default_top_n);
    let prediction = state.predictor.predict(&race, req.odds.as_ref(), top_n)?;

    Ok(HttpResponse::Ok().json(prediction.into_response()))
}
