use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{parse_id, ApiResponse};
use crate::db::models::{LikeTarget, NewLike};
use crate::db::read_model::{self, VideoWithOwner};
use crate::db::schema::{comments, likes, tweets};
use crate::db::{self, DbPool};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/likes")
            .route("/toggle/v/{video_id}", web::post().to(toggle_video_like))
            .route("/toggle/d/v/{video_id}", web::post().to(unlike_video))
            .route("/toggle/c/{comment_id}", web::post().to(toggle_comment_like))
            .route("/toggle/t/{tweet_id}", web::post().to(toggle_tweet_like))
            .route("/videos", web::get().to(liked_videos)),
    );
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LikeState {
    is_liked: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LikedVideos {
    liked_videos: Vec<VideoWithOwner>,
}

/// Videos must also be visible to `user`.
async fn target_exists(
    conn: &mut AsyncPgConnection,
    target: LikeTarget,
    user: Uuid,
) -> Result<bool, diesel::result::Error> {
    use diesel::dsl::exists;
    match target {
        LikeTarget::Video(id) => read_model::video_visible(conn, id, Some(user)).await,
        LikeTarget::Comment(id) => {
            diesel::select(exists(comments::table.find(id)))
                .get_result(conn)
                .await
        }
        LikeTarget::Tweet(id) => {
            diesel::select(exists(tweets::table.find(id)))
                .get_result(conn)
                .await
        }
    }
}

async fn delete_like(
    conn: &mut AsyncPgConnection,
    target: LikeTarget,
    user: Uuid,
) -> Result<usize, diesel::result::Error> {
    diesel::delete(
        likes::table
            .filter(likes::target_kind.eq(target.kind()))
            .filter(likes::target_id.eq(target.id()))
            .filter(likes::liked_by.eq(user)),
    )
    .execute(conn)
    .await
}

/// Removes the like if present, otherwise adds it. Returns the new state.
///
/// The unique key on `(target_kind, target_id, liked_by)` keeps this free of
/// duplicate rows under concurrent toggles.
pub async fn toggle_like(
    conn: &mut AsyncPgConnection,
    target: LikeTarget,
    user: Uuid,
) -> Result<bool, diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            let removed = delete_like(conn, target, user).await?;
            if removed > 0 {
                return Ok(false);
            }
            diesel::insert_into(likes::table)
                .values(NewLike::new(target, user))
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
            Ok(true)
        }
        .scope_boxed()
    })
    .await
}

async fn toggle(
    user: AuthUser,
    pool: &DbPool,
    target: LikeTarget,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(pool).await?;
    if !target_exists(&mut conn, target, user.id()).await? {
        return Err(ApiError::not_found(format!(
            "{} does not exist",
            target.label()
        )));
    }

    let is_liked = toggle_like(&mut conn, target, user.id()).await?;
    let message = if is_liked {
        format!("{} liked successfully", target.label())
    } else {
        format!("{} unliked successfully", target.label())
    };
    Ok(ApiResponse::ok(message, LikeState { is_liked }).into_response())
}

pub async fn toggle_video_like(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let target = LikeTarget::Video(parse_id(&path)?);
    toggle(user, &pool, target).await
}

pub async fn toggle_comment_like(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let target = LikeTarget::Comment(parse_id(&path)?);
    toggle(user, &pool, target).await
}

pub async fn toggle_tweet_like(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let target = LikeTarget::Tweet(parse_id(&path)?);
    toggle(user, &pool, target).await
}

/// Unconditional unlike of a video.
pub async fn unlike_video(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let target = LikeTarget::Video(parse_id(&path)?);

    let mut conn = db::connection(&pool).await?;
    if !target_exists(&mut conn, target, user.id()).await? {
        return Err(ApiError::not_found("Video does not exist"));
    }
    delete_like(&mut conn, target, user.id()).await?;

    Ok(ApiResponse::ok("Video unliked successfully", LikeState { is_liked: false }).into_response())
}

pub async fn liked_videos(
    user: AuthUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    let liked_videos = read_model::liked_videos(&mut conn, user.id()).await?;

    Ok(ApiResponse::ok("Liked videos fetched successfully", LikedVideos { liked_videos })
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;

    #[actix_web::test]
    async fn like_toggles_require_a_session() {
        let app = actix_test::init_service(test_app()).await;
        let id = Uuid::new_v4();
        for uri in [
            format!("/api/v1/likes/toggle/v/{}", id),
            format!("/api/v1/likes/toggle/d/v/{}", id),
            format!("/api/v1/likes/toggle/c/{}", id),
            format!("/api/v1/likes/toggle/t/{}", id),
        ] {
            let req = actix_test::TestRequest::post().uri(&uri).to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn liked_videos_requires_a_session() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::get().uri("/api/v1/likes/videos").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn like_state_serializes_camel_case() {
        let json = serde_json::to_value(LikeState { is_liked: true }).unwrap();
        assert_eq!(json, serde_json::json!({ "isLiked": true }));
    }
}
