use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::schema::{
    comments, likes, playlist_videos, playlists, subscriptions, tweets, users, videos,
    watch_history,
};

/// A stored account. Credential fields never leave the process: they are
/// skipped by serde so any read that serializes a `User` is safe to return.
#[derive(Debug, Clone, Serialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    #[serde(skip)]
    pub avatar_public_id: Option<String>,
    pub cover_image: String,
    #[serde(skip)]
    pub cover_image_public_id: Option<String>,
    #[serde(skip)]
    pub password: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub avatar_public_id: Option<String>,
    pub cover_image: String,
    pub cover_image_public_id: Option<String>,
    pub password: String,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

/// Provider reference for the playable video asset.
#[derive(Debug, Clone, Serialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = videos)]
#[serde(rename_all = "camelCase")]
pub struct VideoFile {
    #[diesel(column_name = video_url)]
    pub url: String,
    #[diesel(column_name = video_public_id)]
    pub public_id: String,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = videos)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    #[diesel(column_name = thumbnail_url)]
    pub url: String,
    #[diesel(column_name = thumbnail_public_id)]
    pub public_id: String,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = videos)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[diesel(embed)]
    pub video_file: VideoFile,
    #[diesel(embed)]
    pub thumbnail: Thumbnail,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub is_for_kids: bool,
    #[serde(rename = "isRestrict")]
    pub is_restricted: bool,
    pub owner: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = videos)]
pub struct NewVideo {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub video_public_id: String,
    pub thumbnail_url: String,
    pub thumbnail_public_id: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub is_for_kids: bool,
    pub is_restricted: bool,
    pub owner: Uuid,
}

#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = videos)]
#[serde(rename_all = "camelCase")]
pub struct VideoChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_for_kids: Option<bool>,
    #[serde(rename = "isRestrict")]
    pub is_restricted: Option<bool>,
    pub is_published: Option<bool>,
    #[serde(skip)]
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[diesel(table_name = comments)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub content: String,
    pub video: Uuid,
    pub owner: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub content: String,
    pub video: Uuid,
    pub owner: Uuid,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[diesel(table_name = tweets)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub content: String,
    pub owner: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tweets)]
pub struct NewTweet {
    pub id: Uuid,
    pub content: String,
    pub owner: Uuid,
}

/// What a like points at. Stored as `(target_kind, target_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Video(Uuid),
    Comment(Uuid),
    Tweet(Uuid),
}

impl LikeTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            LikeTarget::Video(_) => "video",
            LikeTarget::Comment(_) => "comment",
            LikeTarget::Tweet(_) => "tweet",
        }
    }

    pub fn id(&self) -> Uuid {
        match *self {
            LikeTarget::Video(id) | LikeTarget::Comment(id) | LikeTarget::Tweet(id) => id,
        }
    }

    /// Capitalised noun used in response messages.
    pub fn label(&self) -> &'static str {
        match self {
            LikeTarget::Video(_) => "Video",
            LikeTarget::Comment(_) => "Comment",
            LikeTarget::Tweet(_) => "Tweet",
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = likes)]
pub struct NewLike {
    pub id: Uuid,
    pub target_kind: String,
    pub target_id: Uuid,
    pub liked_by: Uuid,
}

impl NewLike {
    pub fn new(target: LikeTarget, liked_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_kind: target.kind().to_string(),
            target_id: target.id(),
            liked_by,
        }
    }
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[diesel(table_name = playlists)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = playlists)]
pub struct NewPlaylist {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub owner: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = playlist_videos)]
pub struct NewPlaylistVideo {
    pub playlist_id: Uuid,
    pub video_id: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscription {
    pub id: Uuid,
    pub subscriber: Uuid,
    pub channel: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = watch_history)]
pub struct NewWatchEntry {
    pub user_id: Uuid,
    pub video_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_targets_map_to_distinct_storage_kinds() {
        let id = Uuid::new_v4();
        let kinds: Vec<_> = [
            LikeTarget::Video(id),
            LikeTarget::Comment(id),
            LikeTarget::Tweet(id),
        ]
        .iter()
        .map(|target| {
            assert_eq!(target.id(), id);
            target.kind()
        })
        .collect();
        assert_eq!(kinds, ["video", "comment", "tweet"]);
    }

    #[test]
    fn new_like_records_kind_and_target() {
        let target = Uuid::new_v4();
        let user = Uuid::new_v4();
        let like = NewLike::new(LikeTarget::Tweet(target), user);
        assert_eq!(like.target_kind, "tweet");
        assert_eq!(like.target_id, target);
        assert_eq!(like.liked_by, user);
    }

    #[test]
    fn user_serialization_hides_credentials() {
        let now = chrono::Utc::now().naive_utc();
        let user = User {
            id: Uuid::new_v4(),
            user_name: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            avatar: "https://cdn/a.png".into(),
            avatar_public_id: Some("a".into()),
            cover_image: String::new(),
            cover_image_public_id: None,
            password: "$2b$04$hash".into(),
            refresh_token: Some("token".into()),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["userName"], "alice");
        assert!(json.get("_id").is_some());
    }
}
