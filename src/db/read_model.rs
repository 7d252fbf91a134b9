//! Denormalized reads.
//!
//! Each rich read is one SQL statement assembled from the fragments below:
//! an owner join, like counts, and viewer-relation flags computed with
//! `EXISTS`. Listings add an `ORDER BY` built from [`SortSpec`] and a
//! `LIMIT/OFFSET` window with a `COUNT(*)` companion query.

use chrono::NaiveDateTime;
use diesel::sql_types::{Array, BigInt, Bool, Nullable, Text, Timestamp, Uuid as SqlUuid};
use diesel::{BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, QueryableByName};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use crate::api::pagination::PageRequest;
use crate::db::models::{Thumbnail, User, VideoFile};
use crate::db::schema::videos;

/// Video columns without the raw owner id, for reads that nest the owner.
#[derive(Debug, Clone, Serialize, QueryableByName)]
#[diesel(table_name = videos)]
#[serde(rename_all = "camelCase")]
pub struct VideoFields {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Public projection of a user, read from `owner_*` columns.
#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[diesel(sql_type = SqlUuid, column_name = owner_id)]
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[diesel(sql_type = Text, column_name = owner_user_name)]
    pub user_name: String,
    #[diesel(sql_type = Text, column_name = owner_full_name)]
    pub full_name: String,
    #[diesel(sql_type = Text, column_name = owner_avatar)]
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct SubscribableOwner {
    #[diesel(embed)]
    #[serde(flatten)]
    pub user: UserSummary,
    #[diesel(sql_type = Bool, column_name = owner_is_subscribe)]
    pub is_subscribe: bool,
}

/// A video as seen by a signed-in viewer.
#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct VideoCard {
    #[diesel(embed)]
    #[serde(flatten)]
    pub video: VideoFields,
    #[diesel(sql_type = BigInt)]
    pub likes: i64,
    #[diesel(sql_type = Bool)]
    pub is_liked: bool,
    #[diesel(embed)]
    pub owner: SubscribableOwner,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct VideoListing {
    #[diesel(embed)]
    #[serde(flatten)]
    pub video: VideoFields,
    #[diesel(sql_type = BigInt)]
    pub likes: i64,
    #[diesel(embed)]
    pub owner: UserSummary,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct VideoWithOwner {
    #[diesel(embed)]
    #[serde(flatten)]
    pub video: VideoFields,
    #[diesel(embed)]
    pub owner: UserSummary,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct ChannelVideo {
    #[diesel(embed)]
    #[serde(flatten)]
    pub video: VideoFields,
    #[diesel(sql_type = BigInt)]
    pub likes: i64,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[diesel(embed)]
    #[serde(flatten)]
    pub user: User,
    #[diesel(sql_type = BigInt)]
    pub subscribers_count: i64,
    #[diesel(sql_type = BigInt)]
    pub channels_subscribed_to_count: i64,
    #[diesel(sql_type = Bool)]
    pub is_subscribe: bool,
}

/// A comment or tweet with its author and like count.
#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct PostWithOwner {
    #[diesel(sql_type = SqlUuid)]
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[diesel(sql_type = Text)]
    pub content: String,
    #[diesel(sql_type = BigInt)]
    pub likes: i64,
    #[diesel(sql_type = Timestamp)]
    pub created_at: NaiveDateTime,
    #[diesel(sql_type = Timestamp)]
    pub updated_at: NaiveDateTime,
    #[diesel(embed)]
    pub owner: UserSummary,
}

#[derive(Debug, Clone, QueryableByName)]
pub struct PlaylistEntry {
    #[diesel(sql_type = SqlUuid)]
    pub playlist_id: Uuid,
    #[diesel(embed)]
    pub item: VideoWithOwner,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    #[diesel(sql_type = BigInt)]
    pub total_videos: i64,
    #[diesel(sql_type = BigInt)]
    pub total_likes: i64,
    #[diesel(sql_type = BigInt)]
    pub total_views: i64,
    #[diesel(sql_type = BigInt)]
    pub total_subscribers: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    UploadDate,
    ViewCount,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uploadDate" => Some(SortField::UploadDate),
            "viewCount" => Some(SortField::ViewCount),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortField::UploadDate => "v.created_at",
            SortField::ViewCount => "v.views",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A single sort axis for video listings. Only whitelisted columns reach SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::UploadDate,
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    pub fn order_by(&self) -> String {
        let dir = self.direction.keyword();
        format!("ORDER BY {} {}, v.id {}", self.field.column(), dir, dir)
    }
}

const OWNER_COLUMNS: &str = "u.id AS owner_id, u.user_name AS owner_user_name, \
     u.full_name AS owner_full_name, u.avatar AS owner_avatar";

fn like_count(kind: &str, target: &str) -> String {
    format!(
        "(SELECT COUNT(*) FROM likes l WHERE l.target_kind = '{}' AND l.target_id = {})",
        kind, target
    )
}

/// Columns of a [`VideoCard`]; `$1` is the viewer.
fn video_card_select() -> String {
    format!(
        "SELECT v.*, {likes} AS likes, \
         EXISTS (SELECT 1 FROM likes l WHERE l.target_kind = 'video' \
                 AND l.target_id = v.id AND l.liked_by = $1) AS is_liked, \
         {owner}, \
         EXISTS (SELECT 1 FROM subscriptions s WHERE s.channel = u.id \
                 AND s.subscriber = $1) AS owner_is_subscribe \
         FROM videos v JOIN users u ON u.id = v.owner",
        likes = like_count("video", "v.id"),
        owner = OWNER_COLUMNS,
    )
}

/// Unpublished videos are only visible to their owner.
fn visible_to(viewer: &str) -> String {
    format!("(v.is_published OR v.owner = {})", viewer)
}

fn feed_filter() -> String {
    format!("WHERE ($2::uuid IS NULL OR v.owner = $2) AND {}", visible_to("$1"))
}

/// Whether the video exists and `viewer` may see it. Anonymous viewers only
/// see published videos.
pub async fn video_visible(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<bool, diesel::result::Error> {
    use diesel::dsl::exists;
    let video = videos::table.find(video_id);
    match viewer {
        Some(viewer) => {
            diesel::select(exists(
                video.filter(videos::is_published.or(videos::owner.eq(viewer))),
            ))
            .get_result(conn)
            .await
        }
        None => {
            diesel::select(exists(video.filter(videos::is_published)))
                .get_result(conn)
                .await
        }
    }
}

pub async fn video_card(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
    viewer: Uuid,
) -> Result<Option<VideoCard>, diesel::result::Error> {
    let sql = format!("{} WHERE v.id = $2", video_card_select());
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(viewer)
        .bind::<SqlUuid, _>(video_id)
        .get_result(conn)
        .await
        .optional()
}

/// One page of the video feed plus the total number of matching videos.
pub async fn video_feed(
    conn: &mut AsyncPgConnection,
    viewer: Uuid,
    owner: Option<Uuid>,
    sort: SortSpec,
    page: PageRequest,
) -> Result<(Vec<VideoCard>, i64), diesel::result::Error> {
    let sql = format!(
        "{} {} {} LIMIT $3 OFFSET $4",
        video_card_select(),
        feed_filter(),
        sort.order_by()
    );
    let items = diesel::sql_query(sql)
        .bind::<SqlUuid, _>(viewer)
        .bind::<Nullable<SqlUuid>, _>(owner)
        .bind::<BigInt, _>(page.limit)
        .bind::<BigInt, _>(page.offset())
        .load::<VideoCard>(conn)
        .await?;

    let total = diesel::sql_query(format!(
        "SELECT COUNT(*) AS count FROM videos v {}",
        feed_filter()
    ))
    .bind::<SqlUuid, _>(viewer)
    .bind::<Nullable<SqlUuid>, _>(owner)
    .get_result::<CountRow>(conn)
    .await?
    .count;

    Ok((items, total))
}

/// Every published video, newest or oldest first, for the public app listing.
pub async fn published_videos(
    conn: &mut AsyncPgConnection,
    direction: SortDirection,
) -> Result<Vec<VideoListing>, diesel::result::Error> {
    let sort = SortSpec {
        field: SortField::UploadDate,
        direction,
    };
    let sql = format!(
        "SELECT v.*, {} AS likes, {} FROM videos v JOIN users u ON u.id = v.owner \
         WHERE v.is_published {}",
        like_count("video", "v.id"),
        OWNER_COLUMNS,
        sort.order_by()
    );
    diesel::sql_query(sql).load(conn).await
}

pub async fn video_with_owner(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
) -> Result<Option<VideoWithOwner>, diesel::result::Error> {
    let sql = format!(
        "SELECT v.*, {} FROM videos v JOIN users u ON u.id = v.owner WHERE v.id = $1",
        OWNER_COLUMNS
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(video_id)
        .get_result(conn)
        .await
        .optional()
}

fn channel_profile_select() -> &'static str {
    "SELECT u.*, \
     (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = u.id) AS subscribers_count, \
     (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber = u.id) AS channels_subscribed_to_count, \
     EXISTS (SELECT 1 FROM subscriptions s WHERE s.channel = u.id AND s.subscriber = $1) AS is_subscribe \
     FROM users u"
}

pub async fn channel_profile(
    conn: &mut AsyncPgConnection,
    user_name: &str,
    viewer: Uuid,
) -> Result<Option<ChannelProfile>, diesel::result::Error> {
    let sql = format!("{} WHERE u.user_name = $2", channel_profile_select());
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(viewer)
        .bind::<Text, _>(user_name.to_lowercase())
        .get_result(conn)
        .await
        .optional()
}

pub async fn channel_list(
    conn: &mut AsyncPgConnection,
    viewer: Uuid,
) -> Result<Vec<ChannelProfile>, diesel::result::Error> {
    let sql = format!("{} ORDER BY u.user_name", channel_profile_select());
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(viewer)
        .load(conn)
        .await
}

/// Videos the user has watched and can still see, most recent watch first.
pub async fn watch_history(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<Vec<VideoWithOwner>, diesel::result::Error> {
    let sql = format!(
        "SELECT v.*, {} FROM watch_history w \
         JOIN videos v ON v.id = w.video_id \
         JOIN users u ON u.id = v.owner \
         WHERE w.user_id = $1 AND {} ORDER BY w.watched_at DESC",
        OWNER_COLUMNS,
        visible_to("$1")
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(user_id)
        .load(conn)
        .await
}

/// Videos the user liked and can still see, most recent like first.
pub async fn liked_videos(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<Vec<VideoWithOwner>, diesel::result::Error> {
    let sql = format!(
        "SELECT v.*, {} FROM likes lk \
         JOIN videos v ON lk.target_kind = 'video' AND v.id = lk.target_id \
         JOIN users u ON u.id = v.owner \
         WHERE lk.liked_by = $1 AND {} ORDER BY lk.created_at DESC",
        OWNER_COLUMNS,
        visible_to("$1")
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(user_id)
        .load(conn)
        .await
}

pub async fn video_comments(
    conn: &mut AsyncPgConnection,
    video_id: Uuid,
) -> Result<Vec<PostWithOwner>, diesel::result::Error> {
    let sql = format!(
        "SELECT c.id, c.content, {} AS likes, c.created_at, c.updated_at, {} \
         FROM comments c JOIN users u ON u.id = c.owner \
         WHERE c.video = $1 ORDER BY c.created_at DESC, c.id",
        like_count("comment", "c.id"),
        OWNER_COLUMNS
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(video_id)
        .load(conn)
        .await
}

pub async fn user_tweets(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<Vec<PostWithOwner>, diesel::result::Error> {
    let sql = format!(
        "SELECT t.id, t.content, {} AS likes, t.created_at, t.updated_at, {} \
         FROM tweets t JOIN users u ON u.id = t.owner \
         WHERE t.owner = $1 ORDER BY t.created_at DESC, t.id",
        like_count("tweet", "t.id"),
        OWNER_COLUMNS
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(user_id)
        .load(conn)
        .await
}

/// Users subscribed to `channel`.
pub async fn subscribers_of(
    conn: &mut AsyncPgConnection,
    channel: Uuid,
) -> Result<Vec<UserSummary>, diesel::result::Error> {
    let sql = format!(
        "SELECT {} FROM subscriptions s JOIN users u ON u.id = s.subscriber \
         WHERE s.channel = $1 ORDER BY s.created_at DESC",
        OWNER_COLUMNS
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(channel)
        .load(conn)
        .await
}

/// Channels `subscriber` is subscribed to.
pub async fn subscribed_channels(
    conn: &mut AsyncPgConnection,
    subscriber: Uuid,
) -> Result<Vec<UserSummary>, diesel::result::Error> {
    let sql = format!(
        "SELECT {} FROM subscriptions s JOIN users u ON u.id = s.channel \
         WHERE s.subscriber = $1 ORDER BY s.created_at DESC",
        OWNER_COLUMNS
    );
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(subscriber)
        .load(conn)
        .await
}

/// Videos of the given playlists that `viewer` can see, in insertion order.
pub async fn playlist_entries(
    conn: &mut AsyncPgConnection,
    playlist_ids: Vec<Uuid>,
    viewer: Uuid,
) -> Result<Vec<PlaylistEntry>, diesel::result::Error> {
    if playlist_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT pv.playlist_id, v.*, {} FROM playlist_videos pv \
         JOIN videos v ON v.id = pv.video_id \
         JOIN users u ON u.id = v.owner \
         WHERE pv.playlist_id = ANY($1) AND {} ORDER BY pv.position",
        OWNER_COLUMNS,
        visible_to("$2")
    );
    diesel::sql_query(sql)
        .bind::<Array<SqlUuid>, _>(playlist_ids)
        .bind::<SqlUuid, _>(viewer)
        .load(conn)
        .await
}

pub async fn channel_stats(
    conn: &mut AsyncPgConnection,
    owner: Uuid,
) -> Result<ChannelStats, diesel::result::Error> {
    let sql = "SELECT \
        (SELECT COUNT(*) FROM videos v WHERE v.owner = $1) AS total_videos, \
        (SELECT COUNT(*) FROM likes l JOIN videos v ON l.target_kind = 'video' \
            AND l.target_id = v.id WHERE v.owner = $1) AS total_likes, \
        (SELECT COALESCE(SUM(v.views), 0)::BIGINT FROM videos v WHERE v.owner = $1) AS total_views, \
        (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = $1) AS total_subscribers";
    diesel::sql_query(sql)
        .bind::<SqlUuid, _>(owner)
        .get_result(conn)
        .await
}

pub async fn channel_videos(
    conn: &mut AsyncPgConnection,
    owner: Uuid,
    page: PageRequest,
) -> Result<(Vec<ChannelVideo>, i64), diesel::result::Error> {
    let sort = SortSpec::default();
    let sql = format!(
        "SELECT v.*, {} AS likes FROM videos v WHERE v.owner = $1 {} LIMIT $2 OFFSET $3",
        like_count("video", "v.id"),
        sort.order_by()
    );
    let items = diesel::sql_query(sql)
        .bind::<SqlUuid, _>(owner)
        .bind::<BigInt, _>(page.limit)
        .bind::<BigInt, _>(page.offset())
        .load::<ChannelVideo>(conn)
        .await?;

    let total = diesel::sql_query("SELECT COUNT(*) AS count FROM videos v WHERE v.owner = $1")
        .bind::<SqlUuid, _>(owner)
        .get_result::<CountRow>(conn)
        .await?
        .count;

    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_spec_renders_one_whitelisted_axis() {
        let spec = SortSpec {
            field: SortField::ViewCount,
            direction: SortDirection::Asc,
        };
        assert_eq!(spec.order_by(), "ORDER BY v.views ASC, v.id ASC");
        assert_eq!(
            SortSpec::default().order_by(),
            "ORDER BY v.created_at DESC, v.id DESC"
        );
    }

    #[test]
    fn sort_parsing_rejects_unknown_values() {
        assert_eq!(SortField::parse("uploadDate"), Some(SortField::UploadDate));
        assert_eq!(SortField::parse("viewCount"), Some(SortField::ViewCount));
        assert_eq!(SortField::parse("views; DROP TABLE users"), None);
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("sideways"), None);
    }

    #[test]
    fn video_card_select_binds_viewer_for_both_flags() {
        let sql = video_card_select();
        assert!(sql.contains("l.liked_by = $1"));
        assert!(sql.contains("s.subscriber = $1"));
        assert!(sql.contains("AS owner_is_subscribe"));
    }

    #[test]
    fn feed_hides_other_owners_unpublished_videos() {
        assert_eq!(
            feed_filter(),
            "WHERE ($2::uuid IS NULL OR v.owner = $2) AND (v.is_published OR v.owner = $1)"
        );
    }

    #[test]
    fn like_counts_are_scoped_to_their_target_kind() {
        assert_eq!(
            like_count("comment", "c.id"),
            "(SELECT COUNT(*) FROM likes l WHERE l.target_kind = 'comment' AND l.target_id = c.id)"
        );
    }
}
