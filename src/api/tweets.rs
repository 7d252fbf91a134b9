use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{ensure_owner, non_blank, parse_id, ApiResponse};
use crate::db::models::{NewTweet, Tweet};
use crate::db::read_model;
use crate::db::schema::{likes, tweets, users};
use crate::db::{self, DbPool};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tweets")
            .route("", web::post().to(create_tweet))
            .route("/", web::post().to(create_tweet))
            .route("/user/{user_id}", web::get().to(user_tweets))
            .route("/{tweet_id}", web::patch().to(update_tweet))
            .route("/{tweet_id}", web::delete().to(delete_tweet)),
    );
}

#[derive(Debug, Deserialize)]
pub struct TweetInput {
    pub content: Option<String>,
}

async fn owned_tweet(
    conn: &mut AsyncPgConnection,
    tweet_id: Uuid,
    user: Uuid,
) -> Result<Tweet, ApiError> {
    let tweet = tweets::table
        .find(tweet_id)
        .select(Tweet::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::not_found("Tweet does not exist"))?;
    ensure_owner(tweet.owner, user, "tweet")?;
    Ok(tweet)
}

pub async fn create_tweet(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<TweetInput>,
) -> Result<HttpResponse, ApiError> {
    let content = non_blank(body.content.as_deref())
        .ok_or_else(|| ApiError::bad_request("Content is required"))?;

    let mut conn = db::connection(&pool).await?;
    let tweet = diesel::insert_into(tweets::table)
        .values(NewTweet {
            id: Uuid::new_v4(),
            content,
            owner: user.id(),
        })
        .returning(Tweet::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::created("Tweet added successfully", tweet).into_response())
}

pub async fn user_tweets(
    _user: AuthUser,
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
    let tweets = read_model::user_tweets(&mut conn, user_id).await?;

    Ok(ApiResponse::ok("Tweets fetched successfully", tweets).into_response())
}

pub async fn update_tweet(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
    body: web::Json<TweetInput>,
) -> Result<HttpResponse, ApiError> {
    let tweet_id = parse_id(&path)?;
    let content = non_blank(body.content.as_deref())
        .ok_or_else(|| ApiError::bad_request("Content is required"))?;

    let mut conn = db::connection(&pool).await?;
    owned_tweet(&mut conn, tweet_id, user.id()).await?;

    let tweet = diesel::update(tweets::table.find(tweet_id))
        .set((
            tweets::content.eq(content),
            tweets::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Tweet::as_returning())
        .get_result(&mut conn)
        .await?;

    Ok(ApiResponse::ok("Tweet updated successfully", tweet).into_response())
}

pub async fn delete_tweet(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let tweet_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    owned_tweet(&mut conn, tweet_id, user.id()).await?;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            diesel::delete(
                likes::table
                    .filter(likes::target_kind.eq("tweet"))
                    .filter(likes::target_id.eq(tweet_id)),
            )
            .execute(conn)
            .await?;
            diesel::delete(tweets::table.find(tweet_id))
                .execute(conn)
                .await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await?;

    Ok(ApiResponse::message("Tweet deleted successfully").into_response())
}
