//! Development-only endpoints. Unauthenticated and destructive; mounted only
//! when `dev_routes` is enabled.

use actix_web::{web, HttpResponse};

use super::error::ApiError;
use super::shared::ApiResponse;
use crate::config::AppConfig;
use crate::db::{self, DbPool};
use crate::services::seeder;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/seed/video", web::post().to(seed_video))
        .route(
            "/seed/generated-credentials",
            web::get().to(generated_credentials),
        )
        .route("/reset-db", web::delete().to(reset_db));
}

pub async fn seed_video(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    let users = seeder::seed_users(&mut conn, &config.seed, config.auth.bcrypt_cost).await?;
    seeder::seed_content(&mut conn, &users, &config.seed).await?;

    Ok(ApiResponse::created(
        "Database populated for video successfully",
        serde_json::json!({}),
    )
    .into_response())
}

pub async fn generated_credentials(
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let credentials = seeder::read_credentials(&config.seed.credentials_file)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("No credentials found. Did you forget to run the seeder?")
        })?;

    Ok(ApiResponse::ok("Dummy credentials fetched successfully", credentials).into_response())
}

pub async fn reset_db(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    seeder::reset_tables(&mut conn).await?;
    seeder::remove_credentials(&config.seed.credentials_file).await;
    log::warn!("database reset");

    Ok(ApiResponse::message("Database dropped successfully").into_response())
}
