use actix_web::{web, HttpResponse};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use uuid::Uuid;

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{parse_id, ApiResponse};
use crate::db::models::NewSubscription;
use crate::db::read_model::{self, UserSummary};
use crate::db::schema::{subscriptions, users};
use crate::db::{self, DbPool};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscriptions")
            .route("/channels", web::get().to(channel_list))
            .route("/c/{channel_id}", web::post().to(toggle_subscription))
            .route("/c/{subscriber_id}", web::get().to(subscribed_channels))
            .route("/u/{channel_id}", web::get().to(channel_subscribers)),
    );
}

#[derive(Serialize)]
struct SubscriptionState {
    subscribed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribedChannels {
    subscribed_channels: Vec<UserSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSubscribers {
    subscribe_users: Vec<UserSummary>,
}

async fn ensure_user_exists(conn: &mut AsyncPgConnection, id: Uuid, what: &str) -> Result<(), ApiError> {
    let exists: bool = diesel::select(diesel::dsl::exists(users::table.find(id)))
        .get_result(conn)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("{} does not exist", what)))
    }
}

/// Subscribes `subscriber` to `channel`, or unsubscribes if already subscribed.
/// Returns the new state.
pub async fn toggle(
    conn: &mut AsyncPgConnection,
    subscriber: Uuid,
    channel: Uuid,
) -> Result<bool, diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        async move {
            let removed = diesel::delete(
                subscriptions::table
                    .filter(subscriptions::subscriber.eq(subscriber))
                    .filter(subscriptions::channel.eq(channel)),
            )
            .execute(conn)
            .await?;
            if removed > 0 {
                return Ok(false);
            }
            diesel::insert_into(subscriptions::table)
                .values(NewSubscription {
                    id: Uuid::new_v4(),
                    subscriber,
                    channel,
                })
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
            Ok(true)
        }
        .scope_boxed()
    })
    .await
}

pub async fn toggle_subscription(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let channel_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    ensure_user_exists(&mut conn, channel_id, "Channel").await?;

    let subscribed = toggle(&mut conn, user.id(), channel_id).await?;
    let message = if subscribed {
        "Channel subscribed successfully"
    } else {
        "Channel unsubscribed successfully"
    };
    Ok(ApiResponse::ok(message, SubscriptionState { subscribed }).into_response())
}

pub async fn subscribed_channels(
    _user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let subscriber_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    ensure_user_exists(&mut conn, subscriber_id, "User").await?;
    let subscribed_channels = read_model::subscribed_channels(&mut conn, subscriber_id).await?;

    Ok(ApiResponse::ok(
        "Subscribed channels fetched successfully",
        SubscribedChannels {
            subscribed_channels,
        },
    )
    .into_response())
}

pub async fn channel_subscribers(
    _user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let channel_id = parse_id(&path)?;

    let mut conn = db::connection(&pool).await?;
    ensure_user_exists(&mut conn, channel_id, "Channel").await?;
    let subscribe_users = read_model::subscribers_of(&mut conn, channel_id).await?;

    Ok(ApiResponse::ok(
        "Channel subscribers fetched successfully",
        ChannelSubscribers { subscribe_users },
    )
    .into_response())
}

pub async fn channel_list(
    user: AuthUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    let channels = read_model::channel_list(&mut conn, user.id()).await?;

    Ok(ApiResponse::ok("All channels fetched successfully", channels).into_response())
}
