use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::pagination::{Page, PageLabels, PageQuery, PageRequest};
use super::shared::{ensure_owner, non_blank, parse_id, ApiResponse};
use crate::config::AppConfig;
use crate::db::models::{NewVideo, NewWatchEntry, Video, VideoChanges};
use crate::db::read_model::{self, SortDirection, SortField, SortSpec};
use crate::db::schema::{comments, likes, playlist_videos, users, videos, watch_history};
use crate::db::{self, DbPool};
use crate::services::media::{MediaClient, ResourceType, UploadedAsset};
use crate::services::uploads::MultipartForm;

const FEED_LABELS: PageLabels = PageLabels {
    docs: "videos",
    total_docs: "totalVideos",
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/videos")
            .route("/app", web::get().to(list_published))
            .route("/result", web::get().to(list_videos))
            .route("/upload", web::post().to(upload_video))
            .route("/change-upload-video/{video_id}", web::patch().to(replace_video_file))
            .route("/change-upload-thumbnail/{video_id}", web::patch().to(replace_thumbnail))
            .route("/watch/{video_id}", web::patch().to(watch_video))
            .route("/toggle/publish/{video_id}", web::patch().to(toggle_publish))
            .route("/{video_id}", web::get().to(get_video))
            .route("/{video_id}", web::patch().to(update_video))
            .route("/{video_id}", web::delete().to(delete_video)),
    );
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppListQuery {
    pub sort_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

impl FeedQuery {
    fn sort(&self) -> Result<SortSpec, ApiError> {
        let mut sort = SortSpec::default();
        if let Some(raw) = non_blank(self.sort_by.as_deref()) {
            sort.direction = SortDirection::parse(&raw)
                .ok_or_else(|| ApiError::bad_request("sortBy must be asc or desc"))?;
        }
        if let Some(raw) = non_blank(self.sort_type.as_deref()) {
            sort.field = SortField::parse(&raw)
                .ok_or_else(|| ApiError::bad_request("sortType must be uploadDate or viewCount"))?;
        }
        Ok(sort)
    }

    fn owner(&self) -> Result<Option<Uuid>, ApiError> {
        non_blank(self.user_id.as_deref())
            .map(|raw| parse_id(&raw))
            .transpose()
    }

    fn page(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishInput {
    pub publish_message: Option<bool>,
}

/// Loads a video and checks that `user` owns it.
async fn owned_video(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
    user: Uuid,
) -> Result<Video, ApiError> {
    let video = videos::table
        .find(video_id)
        .select(Video::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::not_found("Video does not exist"))?;
    ensure_owner(video.owner, user, "video")?;
    Ok(video)
}

pub async fn list_published(
    query: web::Query<AppListQuery>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let direction = match non_blank(query.sort_by.as_deref()) {
        Some(raw) => SortDirection::parse(&raw)
            .ok_or_else(|| ApiError::bad_request("sortBy must be asc or desc"))?,
        None => SortDirection::Desc,
    };

    let mut conn = db::connection(&pool).await?;
    let listing = read_model::published_videos(&mut conn, direction).await?;

    Ok(ApiResponse::ok("Videos fetched successfully", listing).into_response())
}

pub async fn list_videos(
    user: AuthUser,
    query: web::Query<FeedQuery>,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let sort = query.sort()?;
    let owner = query.owner()?;
    let request = PageRequest::from_query(&query.page(), &config.pagination);

    let mut conn = db::connection(&pool).await?;
    if let Some(owner) = owner {
        let exists: bool = diesel::select(diesel::dsl::exists(users::table.find(owner)))
            .get_result(&mut conn)
            .await?;
        if !exists {
            return Err(ApiError::not_found("User does not exist"));
        }
    }

    let (items, total) = read_model::video_feed(&mut conn, user.id(), owner, sort, request).await?;
    let page = Page::new(items, total, request, FEED_LABELS);

    Ok(ApiResponse::ok("Videos fetched successfully", page).into_response())
}

pub async fn upload_video(
    user: AuthUser,
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let mut form = MultipartForm::read(payload, &config.storage).await?;
    let (title, description) = match (form.text("title"), form.text("description")) {
        (Some(title), Some(description)) => (title, description),
        _ => return Err(ApiError::bad_request("title and description are required")),
    };
    let (video_file, thumbnail) = match (form.take_file("videoFile"), form.take_file("thumbnail")) {
        (Some(video_file), Some(thumbnail)) => (video_file, thumbnail),
        _ => return Err(ApiError::bad_request("videoFile and thumbnail are required")),
    };

    let video_asset = media.upload(video_file).await?;
    let thumbnail_asset = match media.upload(thumbnail).await {
        Ok(asset) => asset,
        Err(e) => {
            media.discard(&[(&video_asset, ResourceType::Video)]).await;
            return Err(e);
        }
    };

    let new_video = NewVideo {
        id: Uuid::new_v4(),
        title,
        description,
        video_url: video_asset.secure_url.clone(),
        video_public_id: video_asset.public_id.clone(),
        thumbnail_url: thumbnail_asset.secure_url.clone(),
        thumbnail_public_id: thumbnail_asset.public_id.clone(),
        duration: video_asset.duration.unwrap_or_default(),
        views: 0,
        is_published: true,
        is_for_kids: false,
        is_restricted: false,
        owner: user.id(),
    };

    let inserted = async {
        let mut conn = db::connection(&pool).await?;
        let video = diesel::insert_into(videos::table)
            .values(&new_video)
            .returning(Video::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok::<_, ApiError>(video)
    }
    .await;

    match inserted {
        Ok(video) => Ok(ApiResponse::created("Video uploaded successfully", video).into_response()),
        Err(e) => {
            media
                .discard(&[
                    (&video_asset, ResourceType::Video),
                    (&thumbnail_asset, ResourceType::Image),
                ])
                .await;
            Err(e)
        }
    }
}

pub async fn get_video(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    let card = read_model::video_card(&mut conn, video_id, user.id())
        .await?
        .filter(|card| card.video.is_published || card.owner.user.id == user.id())
        .ok_or_else(|| ApiError::not_found("Video does not exist"))?;

    Ok(ApiResponse::ok("Video fetched successfully", card).into_response())
}

pub async fn update_video(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: web::Json<VideoChanges>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;
    let mut changes = body.into_inner();
    changes.title = non_blank(changes.title.as_deref());
    changes.description = non_blank(changes.description.as_deref());
    if changes.title.is_none() && changes.description.is_none() {
        return Err(ApiError::bad_request("title or description is required"));
    }
    changes.updated_at = Some(chrono::Utc::now().naive_utc());

    let mut conn = db::connection(&pool).await?;
    owned_video(&mut conn, video_id, user.id()).await?;

    let video = diesel::update(videos::table.find(video_id))
        .set(&changes)
        .returning(Video::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::ok("Video updated successfully", video).into_response())
}

/// Removes a video with its comments, the likes on both, playlist memberships
/// and watch history.
async fn delete_video_rows(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
) -> Result<(), diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            let comment_ids = comments::table
                .filter(comments::video.eq(video_id))
                .select(comments::id);
            diesel::delete(
                likes::table
                    .filter(likes::target_kind.eq("comment"))
                    .filter(likes::target_id.eq_any(comment_ids)),
            )
            .execute(conn)
            .await?;
            diesel::delete(comments::table.filter(comments::video.eq(video_id)))
                .execute(conn)
                .await?;
            diesel::delete(
                likes::table
                    .filter(likes::target_kind.eq("video"))
                    .filter(likes::target_id.eq(video_id)),
            )
            .execute(conn)
            .await?;
            diesel::delete(playlist_videos::table.filter(playlist_videos::video_id.eq(video_id)))
                .execute(conn)
                .await?;
            diesel::delete(watch_history::table.filter(watch_history::video_id.eq(video_id)))
                .execute(conn)
                .await?;
            diesel::delete(videos::table.find(video_id))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await
}

pub async fn delete_video(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    let video = owned_video(&mut conn, video_id, user.id()).await?;
    delete_video_rows(&mut conn, video_id).await?;
    drop(conn);

    media
        .delete(&video.video_file.public_id, ResourceType::Video)
        .await;
    media
        .delete(&video.thumbnail.public_id, ResourceType::Image)
        .await;

    Ok(ApiResponse::message("Video deleted successfully").into_response())
}

/// Which stored asset of a video an upload replaces.
#[derive(Debug, Clone, Copy)]
enum VideoAsset {
    File,
    Thumbnail,
}

impl VideoAsset {
    fn field(&self) -> &'static str {
        match self {
            VideoAsset::File => "videoFile",
            VideoAsset::Thumbnail => "thumbnail",
        }
    }

    fn resource(&self) -> ResourceType {
        match self {
            VideoAsset::File => ResourceType::Video,
            VideoAsset::Thumbnail => ResourceType::Image,
        }
    }
}

async fn save_video_asset(
    pool: &DbPool,
    video_id: Uuid,
    kind: VideoAsset,
    asset: &UploadedAsset,
) -> Result<Video, ApiError> {
    let mut conn = db::connection(pool).await?;
    let target = videos::table.find(video_id);
    let video = match kind {
        VideoAsset::File => {
            diesel::update(target)
                .set((
                    videos::video_url.eq(&asset.secure_url),
                    videos::video_public_id.eq(&asset.public_id),
                    videos::duration.eq(asset.duration.unwrap_or_default()),
                    videos::updated_at.eq(diesel::dsl::now),
                ))
                .returning(Video::as_returning())
                .get_result(&mut conn)
                .await?
        }
        VideoAsset::Thumbnail => {
            diesel::update(target)
                .set((
                    videos::thumbnail_url.eq(&asset.secure_url),
                    videos::thumbnail_public_id.eq(&asset.public_id),
                    videos::updated_at.eq(diesel::dsl::now),
                ))
                .returning(Video::as_returning())
                .get_result(&mut conn)
                .await?
        }
    };
    Ok(video)
}

async fn replace_video_asset(
    user: AuthUser,
    video_id: &str,
    payload: Multipart,
    pool: &DbPool,
    media: &MediaClient,
    config: &AppConfig,
    kind: VideoAsset,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(video_id)?;
    let existing = {
        let mut conn = db::connection(pool).await?;
        owned_video(&mut conn, video_id, user.id()).await?
    };

    let mut form = MultipartForm::read(payload, &config.storage).await?;
    let file = form
        .take_file(kind.field())
        .ok_or_else(|| ApiError::bad_request(format!("{} file is required", kind.field())))?;

    let asset = media.upload(file).await?;
    match save_video_asset(pool, video_id, kind, &asset).await {
        Ok(video) => {
            let previous = match kind {
                VideoAsset::File => existing.video_file.public_id,
                VideoAsset::Thumbnail => existing.thumbnail.public_id,
            };
            media.delete(&previous, kind.resource()).await;
            let message = match kind {
                VideoAsset::File => "Video file updated successfully",
                VideoAsset::Thumbnail => "Thumbnail updated successfully",
            };
            Ok(ApiResponse::ok(message, video).into_response())
        }
        Err(e) => {
            media.discard(&[(&asset, kind.resource())]).await;
            Err(e)
        }
    }
}

pub async fn replace_video_file(
    user: AuthUser,
    path: web::Path<String>,
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    replace_video_asset(user, &path, payload, &pool, &media, &config, VideoAsset::File).await
}

pub async fn replace_thumbnail(
    user: AuthUser,
    path: web::Path<String>,
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    replace_video_asset(user, &path, payload, &pool, &media, &config, VideoAsset::Thumbnail).await
}

/// Records one view per viewer. Returns whether this call counted.
pub async fn record_view(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
    viewer: Uuid,
) -> Result<bool, diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            let inserted = diesel::insert_into(watch_history::table)
                .values(NewWatchEntry {
                    user_id: viewer,
                    video_id,
                })
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
            if inserted == 0 {
                return Ok(false);
            }
            diesel::update(videos::table.find(video_id))
                .set(videos::views.eq(videos::views + 1))
                .execute(conn)
                .await?;
            Ok(true)
        }
        .scope_boxed()
    })
    .await
}

pub async fn watch_video(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    if !read_model::video_visible(&mut conn, video_id, Some(user.id())).await? {
        return Err(ApiError::not_found("Video does not exist"));
    }

    let message = if record_view(&mut conn, video_id, user.id()).await? {
        "Video watched successfully"
    } else {
        "Video already watched"
    };
    Ok(ApiResponse::message(message).into_response())
}

pub async fn toggle_publish(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: Option<web::Json<PublishInput>>,
) -> Result<HttpResponse, ApiError> {
    let video_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    let video = owned_video(&mut conn, video_id, user.id()).await?;
    let publish = body
        .and_then(|b| b.publish_message)
        .unwrap_or(!video.is_published);

    let video = diesel::update(videos::table.find(video_id))
        .set((
            videos::is_published.eq(publish),
            videos::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Video::as_returning())
        .get_result(&mut conn)
        .await?;

    let message = if video.is_published {
        "Video published successfully"
    } else {
        "Video unpublished successfully"
    };
    Ok(ApiResponse::ok(message, video).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer, test_app};
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;

    #[test]
    fn feed_query_parses_both_sort_axes() {
        let query = FeedQuery {
            sort_by: Some("asc".into()),
            sort_type: Some("viewCount".into()),
            ..Default::default()
        };
        assert_eq!(
            query.sort().unwrap(),
            SortSpec {
                field: SortField::ViewCount,
                direction: SortDirection::Asc,
            }
        );
        assert_eq!(FeedQuery::default().sort().unwrap(), SortSpec::default());
    }

    #[test]
    fn feed_query_rejects_unknown_sorts_and_bad_owner_ids() {
        let query = FeedQuery {
            sort_type: Some("title".into()),
            ..Default::default()
        };
        assert!(matches!(query.sort(), Err(ApiError::BadRequest(_))));

        let query = FeedQuery {
            user_id: Some("nope".into()),
            ..Default::default()
        };
        assert!(matches!(query.owner(), Err(ApiError::BadRequest(_))));

        let query = FeedQuery {
            user_id: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(query.owner().unwrap(), None);
    }

    #[actix_web::test]
    async fn app_listing_rejects_an_unknown_direction_before_storage() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/videos/app?sortBy=sideways")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn video_routes_require_a_session() {
        let app = actix_test::init_service(test_app()).await;
        let id = Uuid::new_v4();
        for (method, uri) in [
            ("GET", "/api/v1/videos/result".to_string()),
            ("GET", format!("/api/v1/videos/{}", id)),
            ("DELETE", format!("/api/v1/videos/{}", id)),
            ("PATCH", format!("/api/v1/videos/watch/{}", id)),
            ("PATCH", format!("/api/v1/videos/toggle/publish/{}", id)),
        ] {
            let req = actix_test::TestRequest::default()
                .method(method.parse().unwrap())
                .uri(&uri)
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[actix_web::test]
    async fn forged_token_cannot_reach_handlers() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/videos/result")
            .insert_header(bearer("forged"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["message"], "Invalid Access Token");
    }
}
