mod classifier;
mod config;
mod error;
mod explain;
mod imaging;
mod routes;
mod state;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use classifier::TorchClassifier;
use config::ServerConfig;
use explain::GeminiClient;
use routes::configure_routes;
use state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    log::info!("Model directory: {}", config.model_dir.display());
    if config.gemini.api_key.is_empty() {
        log::warn!("GEMINI_AI_API_KEY is not set; explanation requests will fail");
    }

    let classifier = TorchClassifier::load(&config.model_dir).map_err(|e| {
        log::error!("Failed to load model at startup: {:?}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;

    let explainer = GeminiClient::new(&config.gemini).map_err(|e| {
        log::error!("Failed to build explanation client: {:?}", e);
        std::io::Error::other(format!("Explanation client setup failed: {}", e))
    })?;
    log::info!("Explanation endpoint: {}", explainer.endpoint());

    let state = web::Data::new(AppState::new(
        Arc::new(classifier),
        Arc::new(explainer),
        config.upload_limit_bytes,
    ));

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
