use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{ensure_owner, non_blank, parse_id, ApiResponse};
use crate::db::models::{NewPlaylist, NewPlaylistVideo, Playlist};
use crate::db::read_model::{self, VideoWithOwner};
use crate::db::schema::{playlist_videos, playlists, users};
use crate::db::{self, DbPool};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/playlist")
            .route("", web::post().to(create_playlist))
            .route("/", web::post().to(create_playlist))
            .route("/user/{user_id}", web::get().to(user_playlists))
            .route("/add/{video_id}/{playlist_id}", web::patch().to(add_video))
            .route("/remove/{video_id}/{playlist_id}", web::patch().to(remove_video))
            .route("/{playlist_id}", web::get().to(get_playlist))
            .route("/{playlist_id}", web::patch().to(update_playlist))
            .route("/{playlist_id}", web::delete().to(delete_playlist)),
    );
}

#[derive(Debug, Deserialize)]
pub struct PlaylistInput {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A playlist with its videos in insertion order.
#[derive(Debug, Serialize)]
pub struct PlaylistWithVideos {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub videos: Vec<VideoWithOwner>,
}

async fn with_videos(
    conn: &mut AsyncPgConnection,
    playlists: Vec<Playlist>,
    viewer: Uuid,
) -> Result<Vec<PlaylistWithVideos>, diesel::result::Error> {
    let ids = playlists.iter().map(|p| p.id).collect();
    let mut grouped: HashMap<Uuid, Vec<VideoWithOwner>> = HashMap::new();
    for entry in read_model::playlist_entries(conn, ids, viewer).await? {
        grouped.entry(entry.playlist_id).or_default().push(entry.item);
    }

    Ok(playlists
        .into_iter()
        .map(|playlist| PlaylistWithVideos {
            videos: grouped.remove(&playlist.id).unwrap_or_default(),
            playlist,
        })
        .collect())
}

async fn single_with_videos(
    conn: &mut AsyncPgConnection,
    playlist: Playlist,
    viewer: Uuid,
) -> Result<PlaylistWithVideos, ApiError> {
    with_videos(conn, vec![playlist], viewer)
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Playlist does not exist"))
}

async fn find_playlist(
    conn: &mut AsyncPgConnection,
    playlist_id: Uuid,
) -> Result<Playlist, ApiError> {
    playlists::table
        .find(playlist_id)
        .select(Playlist::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::not_found("Playlist does not exist"))
}

async fn owned_playlist(
    conn: &mut AsyncPgConnection,
    playlist_id: Uuid,
    user: Uuid,
) -> Result<Playlist, ApiError> {
    let playlist = find_playlist(conn, playlist_id).await?;
    ensure_owner(playlist.owner, user, "playlist")?;
    Ok(playlist)
}

async fn ensure_video_visible(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
    viewer: Uuid,
) -> Result<(), ApiError> {
    if read_model::video_visible(conn, video_id, Some(viewer)).await? {
        Ok(())
    } else {
        Err(ApiError::not_found("Video does not exist"))
    }
}

pub async fn create_playlist(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<PlaylistInput>,
) -> Result<HttpResponse, ApiError> {
    let name = non_blank(body.name.as_deref());
    let description = non_blank(body.description.as_deref());
    if name.is_none() && description.is_none() {
        return Err(ApiError::bad_request("name or description is required"));
    }

    let mut conn = db::connection(&pool).await?;
    let playlist = diesel::insert_into(playlists::table)
        .values(NewPlaylist {
            id: Uuid::new_v4(),
            name: name.unwrap_or_default(),
            description: description.unwrap_or_default(),
            owner: user.id(),
        })
        .returning(Playlist::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::created(
        "Playlist created successfully",
        PlaylistWithVideos {
            playlist,
            videos: Vec::new(),
        },
    )
    .into_response())
}

pub async fn user_playlists(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let user_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    let exists: bool = diesel::select(diesel::dsl::exists(users::table.find(user_id)))
        .get_result(&mut conn)
        .await?;
    if !exists {
        return Err(ApiError::not_found("User does not exist"));
    }

    let owned = playlists::table
        .filter(playlists::owner.eq(user_id))
        .order(playlists::created_at.desc())
        .select(Playlist::as_select())
        .load(&mut conn)
        .await?;
    let playlists = with_videos(&mut conn, owned, user.id()).await?;

    Ok(ApiResponse::ok("User playlists fetched successfully", playlists).into_response())
}

pub async fn get_playlist(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let playlist_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    let playlist = find_playlist(&mut conn, playlist_id).await?;
    let playlist = single_with_videos(&mut conn, playlist, user.id()).await?;

    Ok(ApiResponse::ok("Playlist fetched successfully", playlist).into_response())
}

pub async fn update_playlist(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: web::Json<PlaylistInput>,
) -> Result<HttpResponse, ApiError> {
    let playlist_id = parse_id(&path)?;
    let (name, description) = match (
        non_blank(body.name.as_deref()),
        non_blank(body.description.as_deref()),
    ) {
        (Some(name), Some(description)) => (name, description),
        _ => return Err(ApiError::bad_request("name and description are required")),
    };

    let mut conn = db::connection(&pool).await?;
    owned_playlist(&mut conn, playlist_id, user.id()).await?;

    let playlist = diesel::update(playlists::table.find(playlist_id))
        .set((
            playlists::name.eq(name),
            playlists::description.eq(description),
            playlists::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Playlist::as_returning())
        .get_result(&mut conn)
        .await?;
    let playlist = single_with_videos(&mut conn, playlist, user.id()).await?;

    Ok(ApiResponse::ok("Playlist updated successfully", playlist).into_response())
}

pub async fn delete_playlist(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let playlist_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    owned_playlist(&mut conn, playlist_id, user.id()).await?;
    // Memberships go with the playlist (ON DELETE CASCADE).
    diesel::delete(playlists::table.find(playlist_id))
        .execute(&mut conn)
        .await?;

    Ok(ApiResponse::message("Playlist deleted successfully").into_response())
}

fn membership_ids(path: &(String, String)) -> Result<(Uuid, Uuid), ApiError> {
    Ok((parse_id(&path.0)?, parse_id(&path.1)?))
}

pub async fn add_video(
    user: AuthUser,
    path: web::Path<(String, String)>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let (video_id, playlist_id) = membership_ids(&path)?;

    let mut conn = db::connection(&pool).await?;
    let playlist = owned_playlist(&mut conn, playlist_id, user.id()).await?;
    ensure_video_visible(&mut conn, video_id, user.id()).await?;

    let inserted = diesel::insert_into(playlist_videos::table)
        .values(NewPlaylistVideo {
            playlist_id,
            video_id,
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)
        .await?;
    if inserted == 0 {
        return Err(ApiError::bad_request("Video already exists in the playlist"));
    }
    let playlist = single_with_videos(&mut conn, playlist, user.id()).await?;

    Ok(ApiResponse::ok("Video added to playlist successfully", playlist).into_response())
}

pub async fn remove_video(
    user: AuthUser,
    path: web::Path<(String, String)>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let (video_id, playlist_id) = membership_ids(&path)?;

    let mut conn = db::connection(&pool).await?;
    let playlist = owned_playlist(&mut conn, playlist_id, user.id()).await?;
    ensure_video_visible(&mut conn, video_id, user.id()).await?;

    diesel::delete(
        playlist_videos::table
            .filter(playlist_videos::playlist_id.eq(playlist_id))
            .filter(playlist_videos::video_id.eq(video_id)),
    )
    .execute(&mut conn)
    .await?;
    let playlist = single_with_videos(&mut conn, playlist, user.id()).await?;

    Ok(ApiResponse::ok("Video removed from playlist successfully", playlist).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;

    #[test]
    fn membership_ids_validate_both_segments() {
        let video = Uuid::new_v4();
        let playlist = Uuid::new_v4();
        assert_eq!(
            membership_ids(&(video.to_string(), playlist.to_string())).unwrap(),
            (video, playlist)
        );
        assert!(membership_ids(&(video.to_string(), "nope".into())).is_err());
        assert!(membership_ids(&("nope".into(), playlist.to_string())).is_err());
    }

    #[test]
    fn playlist_payload_nests_videos_next_to_fields() {
        let now = chrono::Utc::now().naive_utc();
        let payload = PlaylistWithVideos {
            playlist: Playlist {
                id: Uuid::new_v4(),
                name: "Mix".into(),
                description: String::new(),
                owner: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
            },
            videos: Vec::new(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["name"], "Mix");
        assert_eq!(json["videos"], serde_json::json!([]));
        assert!(json.get("_id").is_some());
    }

    #[actix_web::test]
    async fn playlist_routes_require_a_session() {
        let app = actix_test::init_service(test_app()).await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for (method, uri) in [
            ("POST", "/api/v1/playlist".to_string()),
            ("GET", format!("/api/v1/playlist/{}", a)),
            ("GET", format!("/api/v1/playlist/user/{}", a)),
            ("PATCH", format!("/api/v1/playlist/add/{}/{}", a, b)),
            ("PATCH", format!("/api/v1/playlist/remove/{}/{}", a, b)),
            ("DELETE", format!("/api/v1/playlist/{}", a)),
        ] {
            let req = actix_test::TestRequest::default()
                .method(method.parse().unwrap())
                .uri(&uri)
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }
}
