use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{ensure_owner, non_blank, parse_id, ApiResponse};
use crate::db::models::{Comment, NewComment};
use crate::db::read_model::{self, PostWithOwner, VideoWithOwner};
use crate::db::schema::{comments, likes};
use crate::db::{self, DbPool};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/comments")
            .route("/c/{comment_id}", web::patch().to(update_comment))
            .route("/c/{comment_id}", web::delete().to(delete_comment))
            .route("/{video_id}", web::get().to(video_comments))
            .route("/{video_id}", web::post().to(add_comment)),
    );
}

#[derive(Debug, Deserialize)]
pub struct CommentInput {
    pub content: Option<String>,
}

impl CommentInput {
    fn content(&self) -> Result<String, ApiError> {
        non_blank(self.content.as_deref()).ok_or_else(|| ApiError::bad_request("Content is required"))
    }
}

#[derive(Serialize)]
struct VideoComments {
    #[serde(flatten)]
    video: VideoWithOwner,
    comments: Vec<PostWithOwner>,
}

async fn owned_comment(
    conn: &mut AsyncPgConnection,
    comment_id: Uuid,
    user: Uuid,
) -> Result<Comment, ApiError> {
    let comment = comments::table
        .find(comment_id)
        .select(Comment::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::not_found("Comment does not exist"))?;
    ensure_owner(comment.owner, user, "comment")?;
    Ok(comment)
}

/// Public, but a signed-in owner also sees comments on their unpublished videos.
pub async fn video_comments(
    viewer: Option<AuthUser>,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;
    let viewer = viewer.map(|user| user.id());

    let mut conn = db::connection(&pool).await?;
    let video = read_model::video_with_owner(&mut conn, video_id)
        .await?
        .filter(|v| v.video.is_published || Some(v.owner.id) == viewer)
        .ok_or_else(|| ApiError::not_found("Video does not exist"))?;
    let comments = read_model::video_comments(&mut conn, video_id).await?;

    Ok(ApiResponse::ok(
        "Video comments fetched successfully",
        VideoComments { video, comments },
    )
    .into_response())
}

pub async fn add_comment(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: web::Json<CommentInput>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;
    let content = body.content()?;

    let mut conn = db::connection(&pool).await?;
    if !read_model::video_visible(&mut conn, video_id, Some(user.id())).await? {
        return Err(ApiError::not_found("Video does not exist"));
    }

    let comment = diesel::insert_into(comments::table)
        .values(NewComment {
            id: Uuid::new_v4(),
            content,
            video: video_id,
            owner: user.id(),
        })
        .returning(Comment::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::created("Comment added successfully", comment).into_response())
}

pub async fn update_comment(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: web::Json<CommentInput>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = parse_id(&path)?;
    let content = body.content()?;

    let mut conn = db::connection(&pool).await?;
    owned_comment(&mut conn, comment_id, user.id()).await?;

    let comment = diesel::update(comments::table.find(comment_id))
        .set((
            comments::content.eq(content),
            comments::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Comment::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::ok("Comment updated successfully", comment).into_response())
}

pub async fn delete_comment(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let comment_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    owned_comment(&mut conn, comment_id, user.id()).await?;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            diesel::delete(
                likes::table
                    .filter(likes::target_kind.eq("comment"))
                    .filter(likes::target_id.eq(comment_id)),
            )
            .execute(conn)
            .await?;
            diesel::delete(comments::table.find(comment_id))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    Ok(ApiResponse::message("Comment deleted successfully").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer, test_app};
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;

    #[actix_web::test]
    async fn malformed_video_id_is_rejected_before_storage() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/comments/not-an-id")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["message"], "Invalid Id");
    }

    #[actix_web::test]
    async fn reading_comments_treats_a_bad_token_as_anonymous() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/comments/not-an-id")
            .insert_header(bearer("not.a.jwt"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        // Optional identity: the id is validated instead of the token being rejected.
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn writing_comments_requires_a_session() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri(&format!("/api/v1/comments/{}", Uuid::new_v4()))
            .set_json(serde_json::json!({ "content": "hi" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/api/v1/comments/c/{}", Uuid::new_v4()))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn blank_content_is_rejected() {
        let input = CommentInput {
            content: Some("   ".into()),
        };
        assert!(matches!(input.content(), Err(ApiError::BadRequest(_))));
        let input = CommentInput {
            content: Some(" nice video ".into()),
        };
        assert_eq!(input.content().unwrap(), "nice video");
    }
}
