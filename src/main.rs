use actix_web::{middleware, web, App, HttpServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod handlers;

use boatrace_forecast::{EngineConfig, PositionModel, RacePredictor};
use handlers::{health, predict};

/// Application state shared across handlers
pub struct AppState {
    pub predictor: RacePredictor<PositionModel>,
    pub default_top_n: Option<usize>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config_path = std::env::var("ENGINE_CONFIG").ok().map(PathBuf::from);
    let config = EngineConfig::load_or_default(config_path.as_deref())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    config.logging.init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("{}:{}", host, port);

    let model_path = std::env::var("MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config.storage.model_path.clone());

    info!("Loading position model from {:?}", model_path);

    // Serve /health without a model; /predict answers 503 until one is deployed
    let model = match PositionModel::load(&model_path) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to load model: {}. Predictions are unavailable.", e);
            PositionModel::unbound()
        }
    };

    let app_state = Arc::new(AppState {
        predictor: RacePredictor::new(model, config.feature_builder()),
        default_top_n: Some(10),
    });

    info!("Starting Boatrace Forecast API server at http://{}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .route("/health", web::get().to(health::health_check))
            .route("/predict", web::post().to(predict::predict_race))
    })
    .bind(&addr)?
    .run()
    .await
}
