//! Behaviour that only shows up against Postgres. Set `TEST_DATABASE_URL` to
//! run these; without it each test returns early.

use actix_web::http::StatusCode;
use actix_web::test as actix_test;
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use super::testing::{
    app_with, bearer, committed_connection, insert_user, insert_video, test_config,
    test_connection,
};
use super::{likes, subscriptions, videos as video_routes};
use crate::db::models::{LikeTarget, NewPlaylist, NewPlaylistVideo};
use crate::db::read_model;
use crate::db::schema::{
    likes as likes_table, playlist_videos, playlists, subscriptions as subs, users, videos,
};
use crate::services::auth::tests::test_auth_config;
use crate::services::auth::TokenService;

async fn like_rows(conn: &mut AsyncPgConnection, target: Uuid) -> i64 {
    likes_table::table
        .filter(likes_table::target_id.eq(target))
        .count()
        .get_result(conn)
        .await
        .unwrap()
}

#[actix_web::test]
async fn toggling_a_like_twice_restores_the_original_state() {
    let Some(mut conn) = test_connection().await else {
        return;
    };
    let owner = insert_user(&mut conn).await;
    let viewer = insert_user(&mut conn).await;
    let video = insert_video(&mut conn, owner.id, true).await;
    let target = LikeTarget::Video(video);

    assert!(likes::toggle_like(&mut conn, target, viewer.id).await.unwrap());
    assert_eq!(like_rows(&mut conn, video).await, 1);
    assert!(!likes::toggle_like(&mut conn, target, viewer.id).await.unwrap());
    assert_eq!(like_rows(&mut conn, video).await, 0);
}

#[actix_web::test]
async fn toggling_a_subscription_twice_restores_the_original_state() {
    let Some(mut conn) = test_connection().await else {
        return;
    };
    let channel = insert_user(&mut conn).await;
    let subscriber = insert_user(&mut conn).await;

    assert!(subscriptions::toggle(&mut conn, subscriber.id, channel.id).await.unwrap());
    assert!(!subscriptions::toggle(&mut conn, subscriber.id, channel.id).await.unwrap());

    let remaining: i64 = subs::table
        .filter(subs::channel.eq(channel.id))
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[actix_web::test]
async fn watching_twice_counts_a_single_view() {
    let Some(mut conn) = test_connection().await else {
        return;
    };
    let owner = insert_user(&mut conn).await;
    let viewer = insert_user(&mut conn).await;
    let video = insert_video(&mut conn, owner.id, true).await;

    assert!(video_routes::record_view(&mut conn, video, viewer.id).await.unwrap());
    assert!(!video_routes::record_view(&mut conn, video, viewer.id).await.unwrap());

    let views: i64 = videos::table
        .find(video)
        .select(videos::views)
        .first(&mut conn)
        .await
        .unwrap();
    assert_eq!(views, 1);
}

#[actix_web::test]
async fn likes_and_subscriptions_show_on_the_video_card() {
    let Some(mut conn) = test_connection().await else {
        return;
    };
    let owner = insert_user(&mut conn).await;
    let viewer = insert_user(&mut conn).await;
    let video = insert_video(&mut conn, owner.id, true).await;

    let card = read_model::video_card(&mut conn, video, viewer.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card.likes, 0);
    assert!(!card.is_liked);
    assert!(!card.owner.is_subscribe);

    likes::toggle_like(&mut conn, LikeTarget::Video(video), viewer.id)
        .await
        .unwrap();
    subscriptions::toggle(&mut conn, viewer.id, owner.id)
        .await
        .unwrap();

    let card = read_model::video_card(&mut conn, video, viewer.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card.likes, 1);
    assert!(card.is_liked);
    assert!(card.owner.is_subscribe);
    assert_eq!(card.owner.user.id, owner.id);

    // The owner sees the like count but none of the viewer's flags.
    let card = read_model::video_card(&mut conn, video, owner.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card.likes, 1);
    assert!(!card.is_liked);
    assert!(!card.owner.is_subscribe);
}

#[actix_web::test]
async fn unpublished_videos_drop_out_of_other_viewers_lists() {
    let Some(mut conn) = test_connection().await else {
        return;
    };
    let owner = insert_user(&mut conn).await;
    let viewer = insert_user(&mut conn).await;
    let video = insert_video(&mut conn, owner.id, true).await;

    likes::toggle_like(&mut conn, LikeTarget::Video(video), viewer.id)
        .await
        .unwrap();
    video_routes::record_view(&mut conn, video, viewer.id)
        .await
        .unwrap();
    let playlist = Uuid::new_v4();
    diesel::insert_into(playlists::table)
        .values(NewPlaylist {
            id: playlist,
            name: "Later".into(),
            description: String::new(),
            owner: viewer.id,
        })
        .execute(&mut conn)
        .await
        .unwrap();
    diesel::insert_into(playlist_videos::table)
        .values(NewPlaylistVideo {
            playlist_id: playlist,
            video_id: video,
        })
        .execute(&mut conn)
        .await
        .unwrap();

    assert_eq!(read_model::liked_videos(&mut conn, viewer.id).await.unwrap().len(), 1);
    assert_eq!(read_model::watch_history(&mut conn, viewer.id).await.unwrap().len(), 1);

    diesel::update(videos::table.find(video))
        .set(videos::is_published.eq(false))
        .execute(&mut conn)
        .await
        .unwrap();

    assert!(read_model::liked_videos(&mut conn, viewer.id).await.unwrap().is_empty());
    assert!(read_model::watch_history(&mut conn, viewer.id).await.unwrap().is_empty());
    assert!(read_model::playlist_entries(&mut conn, vec![playlist], viewer.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        read_model::playlist_entries(&mut conn, vec![playlist], owner.id)
            .await
            .unwrap()
            .len(),
        1
    );

    assert!(!read_model::video_visible(&mut conn, video, Some(viewer.id)).await.unwrap());
    assert!(!read_model::video_visible(&mut conn, video, None).await.unwrap());
    assert!(read_model::video_visible(&mut conn, video, Some(owner.id)).await.unwrap());
}

#[actix_web::test]
async fn deleting_missing_resources_is_not_found() {
    let Some((url, mut conn)) = committed_connection().await else {
        return;
    };
    let user = insert_user(&mut conn).await;
    let token = TokenService::new(&test_auth_config())
        .issue_access(&user)
        .unwrap();

    let mut config = test_config(true);
    config.database.url = url;
    let app = actix_test::init_service(app_with(config)).await;

    let missing = Uuid::new_v4();
    for uri in [
        format!("/api/v1/videos/{}", missing),
        format!("/api/v1/tweets/{}", missing),
        format!("/api/v1/comments/c/{}", missing),
        format!("/api/v1/playlist/{}", missing),
    ] {
        let req = actix_test::TestRequest::delete()
            .uri(&uri)
            .insert_header(bearer(&token))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    diesel::delete(users::table.find(user.id))
        .execute(&mut conn)
        .await
        .unwrap();
}
