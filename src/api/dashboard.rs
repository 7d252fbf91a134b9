use actix_web::{web, HttpResponse};

use super::auth::AuthUser;
use super::error::ApiError;
use super::pagination::{Page, PageLabels, PageQuery, PageRequest};
use super::shared::ApiResponse;
use crate::config::AppConfig;
use crate::db::read_model;
use crate::db::{self, DbPool};

const CHANNEL_VIDEO_LABELS: PageLabels = PageLabels {
    docs: "channelVideos",
    total_docs: "totalVideos",
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/dashboard")
            .route("/stats", web::get().to(channel_stats))
            .route("/videos", web::get().to(channel_videos)),
    );
}

pub async fn channel_stats(
    user: AuthUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    let stats = read_model::channel_stats(&mut conn, user.id()).await?;

    Ok(ApiResponse::ok("Channel stats fetched successfully", stats).into_response())
}

pub async fn channel_videos(
    user: AuthUser,
    query: web::Query<PageQuery>,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let request = PageRequest::from_query(&query, &config.pagination);

    let mut conn = db::connection(&pool).await?;
    let (items, total) = read_model::channel_videos(&mut conn, user.id(), request).await?;

    Ok(ApiResponse::ok(
        "Channel videos fetched successfully",
        Page::new(items, total, request, CHANNEL_VIDEO_LABELS),
    )
    .into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::testing::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test;

    #[actix_web::test]
    async fn dashboard_requires_a_session() {
        let app = test::init_service(test_app()).await;
        for uri in ["/api/v1/dashboard/stats", "/api/v1/dashboard/videos"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
