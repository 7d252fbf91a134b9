use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use std::io;

mod api;
mod config;
mod db;
mod services;

use api::shared::{json_config, not_found, path_config, query_config};
use services::auth::TokenService;
use services::media::MediaClient;

fn cors(origin: Option<&str>) -> Cors {
    match origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials(),
        None => Cors::permissive(),
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load .env file if it exists
    dotenv().ok();

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = config::AppConfig::new()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    log::info!(
        "Starting server on {}:{} ({} mode)",
        config.server.host,
        config.server.port,
        config.run_mode
    );

    // Multipart uploads are staged here before going to media storage
    tokio::fs::create_dir_all(&config.storage.temp_dir).await?;

    let pool = db::create_pool(&config.database)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let tokens = web::Data::new(TokenService::new(&config.auth));
    let media = web::Data::new(MediaClient::new(config.media.clone()));
    if !media.is_configured() {
        log::warn!("media storage is not configured; uploads will be rejected");
    }
    if config.dev_routes {
        log::warn!("development routes (seed, reset-db) are enabled");
    }

    let bind = (config.server.host.clone(), config.server.port);
    let dev_routes = config.dev_routes;
    let cors_origin = config.cors.origin.clone();
    let config = web::Data::new(config);
    let pool = web::Data::new(pool);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors(cors_origin.as_deref()))
            .app_data(pool.clone())
            .app_data(config.clone())
            .app_data(tokens.clone())
            .app_data(media.clone())
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config())
            .configure(|cfg| api::configure(cfg, dev_routes))
            .service(
                Files::new("/", "public")
                    .index_file("index.html")
                    .default_handler(web::to(not_found)),
            )
            .default_service(web::to(not_found))
    })
    .bind(bind)?
    .run()
    .await
}
