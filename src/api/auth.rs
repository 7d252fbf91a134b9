use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use diesel::{OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use futures::future::LocalBoxFuture;

use super::error::ApiError;
use crate::db::models::User;
use crate::db::schema::users;
use crate::db::{self, DbPool};
use crate::services::auth::{access_token_from, TokenService};

/// The authenticated caller. Taking this as a handler argument protects the route:
/// the request is rejected with 401 before the handler body runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> uuid::Uuid {
        self.0.id
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = access_token_from(req);
        let tokens = req.app_data::<web::Data<TokenService>>().cloned();
        let pool = req.app_data::<web::Data<DbPool>>().cloned();

        Box::pin(async move {
            let token = token.ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;
            let tokens = tokens
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("token service missing")))?;
            let claims = tokens.verify_access(&token)?;

            let pool =
                pool.ok_or_else(|| ApiError::Internal(anyhow::anyhow!("database pool missing")))?;
            let mut conn = db::connection(&pool).await?;
            let user = users::table
                .find(claims.sub)
                .select(User::as_select())
                .first(&mut conn)
                .await
                .optional()?
                .ok_or_else(|| ApiError::unauthorized("Invalid Access Token"))?;

            Ok(AuthUser(user))
        })
    }
}
