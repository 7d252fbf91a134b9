use actix_web::cookie::{time::Duration, Cookie};
use actix_web::{web, HttpRequest};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::config::AuthConfig;
use crate::db::models::User;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub user_name: String,
    pub full_name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    /// Makes every issued refresh token distinct so rotation always invalidates the old one.
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and verifies the access/refresh JWT pair (HS256, separate secrets).
#[derive(Clone)]
pub struct TokenService {
    access: (EncodingKey, DecodingKey),
    refresh: (EncodingKey, DecodingKey),
    access_ttl: i64,
    refresh_ttl: i64,
    secure_cookies: bool,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let keys = |secret: &str| {
            (
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            )
        };
        Self {
            access: keys(&config.access_token_secret),
            refresh: keys(&config.refresh_token_secret),
            access_ttl: config.access_token_ttl_secs,
            refresh_ttl: config.refresh_token_ttl_secs,
            secure_cookies: config.secure_cookies,
        }
    }

    pub fn issue_access(&self, user: &User) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            user_name: user.user_name.clone(),
            full_name: user.full_name.clone(),
            iat: now,
            exp: now + self.access_ttl,
        };
        encode(&Header::default(), &claims, &self.access.0).map_err(token_failure)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + self.refresh_ttl,
        };
        encode(&Header::default(), &claims, &self.refresh.0).map_err(token_failure)
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, ApiError> {
        Ok(TokenPair {
            access_token: self.issue_access(user)?,
            refresh_token: self.issue_refresh(user.id)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, ApiError> {
        decode::<AccessClaims>(token, &self.access.1, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                log::warn!("rejected access token: {}", e);
                ApiError::unauthorized("Invalid Access Token")
            })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, ApiError> {
        decode::<RefreshClaims>(token, &self.refresh.1, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                log::warn!("rejected refresh token: {}", e);
                ApiError::unauthorized("Invalid RefreshToken")
            })
    }

    /// httpOnly cookies carrying both tokens.
    pub fn cookies(&self, pair: &TokenPair) -> [Cookie<'static>; 2] {
        [
            self.cookie(ACCESS_COOKIE, pair.access_token.clone(), self.access_ttl),
            self.cookie(REFRESH_COOKIE, pair.refresh_token.clone(), self.refresh_ttl),
        ]
    }

    pub fn removal_cookies(&self) -> [Cookie<'static>; 2] {
        [ACCESS_COOKIE, REFRESH_COOKIE].map(|name| {
            let mut cookie = self.cookie(name, String::new(), 0);
            cookie.make_removal();
            cookie
        })
    }

    fn cookie(&self, name: &'static str, value: String, ttl: i64) -> Cookie<'static> {
        Cookie::build(name, value)
            .path("/")
            .http_only(true)
            .secure(self.secure_cookies)
            .max_age(Duration::seconds(ttl))
            .finish()
    }
}

fn token_failure(error: jsonwebtoken::errors::Error) -> ApiError {
    ApiError::Internal(anyhow::anyhow!(
        "something went wrong while generating tokens: {}",
        error
    ))
}

/// Access token from the `accessToken` cookie, falling back to a bearer header.
pub fn access_token_from(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(ACCESS_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start_matches("Bearer ").trim().to_string())
        .filter(|token| !token.is_empty())
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    web::block(move || bcrypt::hash(password, cost))
        .await?
        .map_err(|e| ApiError::Internal(e.into()))
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    web::block(move || bcrypt::verify(password, &hash))
        .await?
        .map_err(|e| ApiError::Internal(e.into()))
}
