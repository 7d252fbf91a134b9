//! Fake data for local development. Only reachable through the dev routes.

use diesel::QueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::auth::hash_password;
use crate::api::error::ApiError;
use crate::config::SeedConfig;
use crate::db::models::{
    LikeTarget, NewComment, NewLike, NewPlaylist, NewPlaylistVideo, NewSubscription, NewTweet,
    NewUser, NewVideo,
};
use crate::db::schema::{
    comments, likes, playlist_videos, playlists, subscriptions, tweets, users, videos,
};

const SAMPLE_VIDEOS: &[&str] = &[
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ElephantsDream.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerBlazes.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerEscapes.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerFun.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/Sintel.mp4",
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/TearsOfSteel.mp4",
];

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "river", "canvas", "signal", "orbit", "maple",
    "harbor", "lantern", "quartz", "meadow", "ember", "summit", "velvet", "cipher", "tundra",
    "prism", "echo", "falcon", "garden", "horizon", "island", "jungle", "kernel", "lagoon",
];

const FIRST_NAMES: &[&str] = &[
    "Ava", "Liam", "Noah", "Mia", "Zoe", "Ethan", "Ivy", "Leo", "Nora", "Omar", "Priya", "Sam",
];

const LAST_NAMES: &[&str] = &[
    "Nguyen", "Smith", "Garcia", "Khan", "Rossi", "Muller", "Tanaka", "Silva", "Okafor", "Berg",
];

/// A generated login, written to the credentials file in plain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedCredential {
    pub username: String,
    pub email: String,
    pub password: String,
}

fn words<R: Rng>(rng: &mut R, count: usize) -> String {
    (0..count)
        .filter_map(|_| WORDS.choose(&mut *rng).copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn sentence<R: Rng>(rng: &mut R, count: usize) -> String {
    let mut text = words(rng, count);
    if let Some(first) = text.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    text.push('.');
    text
}

fn paragraph<R: Rng>(rng: &mut R, sentences: usize) -> String {
    (0..sentences)
        .map(|_| {
            let len = rng.gen_range(4..10);
            sentence(&mut *rng, len)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pick<R: Rng>(rng: &mut R, ids: &[Uuid]) -> Option<Uuid> {
    ids.choose(rng).copied()
}

/// Generates `count` users. Returns the rows to insert and their plain-text logins.
fn fake_users(count: usize) -> Vec<(NewUser, SeedCredential)> {
    let mut rng = thread_rng();
    (0..count)
        .map(|i| {
            let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("user");
            let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("seed");
            let suffix: u32 = rng.gen_range(100..10_000);
            let user_name = format!("{}_{}{}{}", first, last, i, suffix).to_lowercase();
            let email = format!("{}@example.com", user_name);
            let password: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();

            let user = NewUser {
                id: Uuid::new_v4(),
                user_name: user_name.clone(),
                email: email.clone(),
                full_name: format!("{} {}", first, last),
                avatar: format!("https://i.pravatar.cc/300?u={}", user_name),
                avatar_public_id: None,
                cover_image: String::new(),
                cover_image_public_id: None,
                // Replaced by the bcrypt hash before insert.
                password: password.clone(),
            };
            let credential = SeedCredential {
                username: user_name,
                email,
                password,
            };
            (user, credential)
        })
        .collect()
}

/// Rows for every content table, generated up front so the write is one transaction.
#[derive(Debug, Default)]
struct ContentPlan {
    videos: Vec<NewVideo>,
    comments: Vec<NewComment>,
    playlists: Vec<NewPlaylist>,
    playlist_videos: Vec<NewPlaylistVideo>,
    likes: Vec<NewLike>,
    tweets: Vec<NewTweet>,
    subscriptions: Vec<NewSubscription>,
}

fn plan_content(users: &[Uuid], config: &SeedConfig) -> ContentPlan {
    let mut rng = thread_rng();
    let mut plan = ContentPlan::default();
    if users.is_empty() {
        return plan;
    }

    for _ in 0..config.videos {
        let Some(owner) = pick(&mut rng, users) else {
            break;
        };
        let video_url = SAMPLE_VIDEOS
            .choose(&mut rng)
            .copied()
            .unwrap_or_default()
            .to_string();
        plan.videos.push(NewVideo {
            id: Uuid::new_v4(),
            title: sentence(&mut rng, 5),
            description: paragraph(&mut rng, 4),
            video_url,
            video_public_id: Uuid::new_v4().to_string(),
            thumbnail_url: format!("https://picsum.photos/seed/{}/640/480", Uuid::new_v4()),
            thumbnail_public_id: Uuid::new_v4().to_string(),
            duration: f64::from(rng.gen_range(1..=120u32)),
            views: rng.gen_range(0..10_000i64),
            is_published: true,
            is_for_kids: rng.gen_bool(0.5),
            is_restricted: rng.gen_bool(0.5),
            owner,
        });
    }
    let video_ids: Vec<Uuid> = plan.videos.iter().map(|v| v.id).collect();
    if video_ids.is_empty() {
        return plan;
    }

    for _ in 0..config.comments {
        if let (Some(owner), Some(video)) = (pick(&mut rng, users), pick(&mut rng, &video_ids)) {
            plan.comments.push(NewComment {
                id: Uuid::new_v4(),
                content: paragraph(&mut rng, 2),
                video,
                owner,
            });
        }
    }

    for _ in 0..config.playlists {
        let Some(owner) = pick(&mut rng, users) else {
            break;
        };
        let playlist = NewPlaylist {
            id: Uuid::new_v4(),
            name: words(&mut rng, 3),
            description: paragraph(&mut rng, 2),
            owner,
        };
        let take = rng.gen_range(0..=video_ids.len().min(10));
        for video_id in video_ids.choose_multiple(&mut rng, take) {
            plan.playlist_videos.push(NewPlaylistVideo {
                playlist_id: playlist.id,
                video_id: *video_id,
            });
        }
        plan.playlists.push(playlist);
    }

    for _ in 0..video_ids.len() {
        if let (Some(video), Some(user)) = (pick(&mut rng, &video_ids), pick(&mut rng, users)) {
            plan.likes.push(NewLike::new(LikeTarget::Video(video), user));
        }
    }

    for _ in 0..config.tweets {
        if let Some(owner) = pick(&mut rng, users) {
            plan.tweets.push(NewTweet {
                id: Uuid::new_v4(),
                content: paragraph(&mut rng, 2),
                owner,
            });
        }
    }

    for _ in 0..users.len() {
        if let (Some(subscriber), Some(channel)) = (pick(&mut rng, users), pick(&mut rng, users)) {
            if subscriber != channel {
                plan.subscriptions.push(NewSubscription {
                    id: Uuid::new_v4(),
                    subscriber,
                    channel,
                });
            }
        }
    }

    plan
}

/// Empties every table.
pub async fn reset_tables(conn: &mut AsyncPgConnection) -> Result<(), diesel::result::Error> {
    diesel::sql_query(
        "TRUNCATE TABLE watch_history, subscriptions, playlist_videos, playlists, likes, \
         tweets, comments, videos, users",
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Ensures at least `config.users` seed users exist and returns every user id.
///
/// When there are too few users the database is wiped and a fresh set is created;
/// their logins are written to `config.credentials_file`.
pub async fn seed_users(
    conn: &mut AsyncPgConnection,
    config: &SeedConfig,
    bcrypt_cost: u32,
) -> Result<Vec<Uuid>, ApiError> {
    let existing: i64 = users::table.count().get_result(conn).await?;
    if existing >= config.users as i64 {
        log::info!("{} users present, reusing them for seeding", existing);
        return Ok(users::table.select(users::id).load(conn).await?);
    }

    reset_tables(conn).await?;
    remove_credentials(&config.credentials_file).await;

    let mut rows = Vec::with_capacity(config.users);
    let mut credentials = Vec::with_capacity(config.users);
    for (mut user, credential) in fake_users(config.users) {
        user.password = hash_password(credential.password.clone(), bcrypt_cost).await?;
        rows.push(user);
        credentials.push(credential);
    }

    if !rows.is_empty() {
        diesel::insert_into(users::table)
            .values(&rows)
            .execute(conn)
            .await?;
    }
    write_credentials(&config.credentials_file, &credentials).await?;
    log::info!("seeded {} users", rows.len());

    Ok(rows.into_iter().map(|u| u.id).collect())
}

/// Replaces all content with random data owned by `users`.
pub async fn seed_content(
    conn: &mut AsyncPgConnection,
    users: &[Uuid],
    config: &SeedConfig,
) -> Result<(), ApiError> {
    let plan = plan_content(users, config);
    let rows = &plan;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            // Comments, memberships and history go with their videos.
            diesel::delete(likes::table).execute(conn).await?;
            diesel::delete(subscriptions::table).execute(conn).await?;
            diesel::delete(tweets::table).execute(conn).await?;
            diesel::delete(playlists::table).execute(conn).await?;
            diesel::delete(videos::table).execute(conn).await?;

            if !rows.videos.is_empty() {
                diesel::insert_into(videos::table)
                    .values(&rows.videos)
                    .execute(conn)
                    .await?;
            }
            if !rows.comments.is_empty() {
                diesel::insert_into(comments::table)
                    .values(&rows.comments)
                    .execute(conn)
                    .await?;
            }
            if !rows.playlists.is_empty() {
                diesel::insert_into(playlists::table)
                    .values(&rows.playlists)
                    .execute(conn)
                    .await?;
            }
            if !rows.playlist_videos.is_empty() {
                diesel::insert_into(playlist_videos::table)
                    .values(&rows.playlist_videos)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
            }
            if !rows.likes.is_empty() {
                diesel::insert_into(likes::table)
                    .values(&rows.likes)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
            }
            if !rows.tweets.is_empty() {
                diesel::insert_into(tweets::table)
                    .values(&rows.tweets)
                    .execute(conn)
                    .await?;
            }
            if !rows.subscriptions.is_empty() {
                diesel::insert_into(subscriptions::table)
                    .values(&rows.subscriptions)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
            }
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    log::info!(
        "seeded {} videos, {} comments, {} playlists, {} tweets",
        plan.videos.len(),
        plan.comments.len(),
        plan.playlists.len(),
        plan.tweets.len()
    );
    Ok(())
}

async fn write_credentials(path: &str, credentials: &[SeedCredential]) -> Result<(), ApiError> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ApiError::Internal(e.into()))?;
    }
    let json = serde_json::to_vec(credentials).map_err(|e| ApiError::Internal(e.into()))?;
    tokio::fs::write(path, json).await.map_err(|e| {
        log::error!("Error while writing the credentials: {}", e);
        ApiError::Internal(e.into())
    })
}

/// Logins from the last user seeding, if the file exists.
pub async fn read_credentials(path: &str) -> Result<Option<Vec<SeedCredential>>, ApiError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ApiError::Internal(e.into())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ApiError::Internal(e.into())),
    }
}

pub async fn remove_credentials(path: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed local: {}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::error!("Error while removing local file {}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SeedConfig {
        SeedConfig {
            users: 5,
            videos: 8,
            comments: 12,
            playlists: 3,
            tweets: 4,
            credentials_file: String::new(),
        }
    }

    #[test]
    fn fake_users_are_unique_and_lowercase() {
        let users = fake_users(20);
        let mut names: Vec<_> = users.iter().map(|(u, _)| u.user_name.clone()).collect();
        assert!(names.iter().all(|n| *n == n.to_lowercase()));
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 20);
        for (user, credential) in &users {
            assert_eq!(user.email, credential.email);
            assert_eq!(credential.password.len(), 12);
        }
    }

    #[test]
    fn content_references_only_known_rows() {
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let plan = plan_content(&users, &small_config());

        assert_eq!(plan.videos.len(), 8);
        assert_eq!(plan.comments.len(), 12);
        assert_eq!(plan.playlists.len(), 3);
        assert_eq!(plan.tweets.len(), 4);

        let video_ids: Vec<Uuid> = plan.videos.iter().map(|v| v.id).collect();
        assert!(plan.videos.iter().all(|v| users.contains(&v.owner)));
        assert!(plan.comments.iter().all(|c| video_ids.contains(&c.video)));
        assert!(plan
            .likes
            .iter()
            .all(|l| l.target_kind == "video" && video_ids.contains(&l.target_id)));
        assert!(plan.subscriptions.iter().all(|s| s.subscriber != s.channel));
    }

    #[test]
    fn no_users_means_no_content() {
        let plan = plan_content(&[], &small_config());
        assert!(plan.videos.is_empty());
        assert!(plan.comments.is_empty());
    }

    #[actix_web::test]
    async fn credentials_file_round_trips_and_missing_file_is_none() {
        let path = std::env::temp_dir()
            .join(format!("videotube-creds-{}", Uuid::new_v4()))
            .join("seed-credentials.json");
        let path = path.to_string_lossy().to_string();
        assert_eq!(read_credentials(&path).await.unwrap(), None);

        let creds = vec![SeedCredential {
            username: "ava".into(),
            email: "ava@example.com".into(),
            password: "secret".into(),
        }];
        write_credentials(&path, &creds).await.unwrap();
        assert_eq!(read_credentials(&path).await.unwrap(), Some(creds));

        remove_credentials(&path).await;
        assert_eq!(read_credentials(&path).await.unwrap(), None);
    }
}
