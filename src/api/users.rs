use actix_multipart::Multipart;
use actix_web::cookie::Cookie;
use actix_web::{web, HttpRequest, HttpResponse};
use diesel::{BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use super::auth::AuthUser;
use super::error::ApiError;
use super::shared::{non_blank, ApiResponse};
use crate::config::AppConfig;
use crate::db::models::{NewUser, User, UserChanges};
use crate::db::read_model::{self, VideoWithOwner};
use crate::db::schema::users;
use crate::db::{self, DbPool};
use crate::services::auth::{hash_password, verify_password, TokenPair, TokenService, REFRESH_COOKIE};
use crate::services::media::{MediaClient, ResourceType, UploadedAsset};
use crate::services::uploads::MultipartForm;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/user")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh-token", web::post().to(refresh_token))
            .route("/logout", web::post().to(logout))
            .route("/change-password", web::post().to(change_password))
            .route("/current-user", web::get().to(current_user))
            .route("/update-account", web::patch().to(update_account))
            .route("/avatar-update", web::patch().to(update_avatar))
            .route("/cover-image-update", web::patch().to(update_cover_image))
            .route("/channel-profile/{username}", web::get().to(channel_profile))
            .route("/history", web::get().to(watch_history)),
    );
}

#[derive(Debug, Validate)]
struct Registration {
    #[validate(length(min = 1, message = "fullName is required"))]
    full_name: String,
    #[validate(length(min = 1, message = "userName is required"))]
    user_name: String,
    #[validate(email(message = "email is invalid"))]
    email: String,
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}

impl Registration {
    fn from_form(form: &MultipartForm) -> Self {
        Self {
            full_name: form.text("fullName").unwrap_or_default(),
            user_name: form.text("userName").unwrap_or_default().to_lowercase(),
            email: form.text("email").unwrap_or_default().to_lowercase(),
            password: form.text("password").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    email: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshInput {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    old_password: Option<String>,
    new_password: Option<String>,
    confirm_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountInput {
    email: Option<String>,
    full_name: Option<String>,
    user_name: Option<String>,
}

#[derive(Serialize)]
struct SessionData {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserWithHistory {
    #[serde(flatten)]
    user: User,
    watch_history: Vec<VideoWithOwner>,
}

fn with_cookies<T: Serialize>(
    body: ApiResponse<T>,
    cookies: impl IntoIterator<Item = Cookie<'static>>,
) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    for cookie in cookies {
        response.cookie(cookie);
    }
    response.json(body)
}

async fn store_refresh_token(
    pool: &DbPool,
    user_id: Uuid,
    token: Option<&str>,
) -> Result<(), ApiError> {
    let mut conn = db::connection(pool).await?;
    diesel::update(users::table.find(user_id))
        .set(users::refresh_token.eq(token))
        .execute(&mut conn)
        .await?;
    Ok(())
}

pub async fn register(
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let mut form = MultipartForm::read(payload, &config.storage).await?;
    let input = Registration::from_form(&form);
    input.validate()?;

    let avatar = form
        .take_file("avatar")
        .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;
    let cover_image = form.take_file("coverImage");

    {
        let mut conn = db::connection(&pool).await?;
        let taken: i64 = users::table
            .filter(
                users::user_name
                    .eq(&input.user_name)
                    .or(users::email.eq(&input.email)),
            )
            .count()
            .get_result(&mut conn)
            .await?;
        if taken > 0 {
            return Err(ApiError::Conflict(
                "User with email or username already exists".into(),
            ));
        }
    }

    let password = hash_password(input.password, config.auth.bcrypt_cost).await?;

    let avatar = media.upload(avatar).await?;
    let cover_image = match cover_image {
        Some(file) => match media.upload(file).await {
            Ok(asset) => Some(asset),
            Err(e) => {
                media.discard(&[(&avatar, ResourceType::Image)]).await;
                return Err(e);
            }
        },
        None => None,
    };

    let new_user = NewUser {
        id: Uuid::new_v4(),
        user_name: input.user_name,
        email: input.email,
        full_name: input.full_name,
        avatar: avatar.secure_url.clone(),
        avatar_public_id: Some(avatar.public_id.clone()),
        cover_image: cover_image
            .as_ref()
            .map(|c| c.secure_url.clone())
            .unwrap_or_default(),
        cover_image_public_id: cover_image.as_ref().map(|c| c.public_id.clone()),
        password,
    };

    let inserted = async {
        let mut conn = db::connection(&pool).await?;
        let user = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok::<_, ApiError>(user)
    }
    .await;

    match inserted {
        Ok(user) => {
            log::info!("registered user {}", user.user_name);
            Ok(ApiResponse::created("User registered successfully", user).into_response())
        }
        Err(e) => {
            let mut uploaded = vec![(&avatar, ResourceType::Image)];
            if let Some(cover) = cover_image.as_ref() {
                uploaded.push((cover, ResourceType::Image));
            }
            media.discard(&uploaded).await;
            Err(e)
        }
    }
}

pub async fn login(
    pool: web::Data<DbPool>,
    tokens: web::Data<TokenService>,
    body: web::Json<LoginInput>,
) -> Result<HttpResponse, ApiError> {
    let input = body.into_inner();
    let email = non_blank(input.email.as_deref()).map(|e| e.to_lowercase());
    let user_name = non_blank(input.user_name.as_deref()).map(|u| u.to_lowercase());
    if email.is_none() && user_name.is_none() {
        return Err(ApiError::bad_request("email or username is required"));
    }
    let password =
        non_blank(input.password.as_deref()).ok_or_else(|| ApiError::bad_request("password is required"))?;

    let mut conn = db::connection(&pool).await?;
    let user = users::table
        .filter(
            users::email
                .eq(email.unwrap_or_default())
                .or(users::user_name.eq(user_name.unwrap_or_default())),
        )
        .select(User::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !verify_password(password, user.password.clone()).await? {
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let pair = tokens.issue_pair(&user)?;
    diesel::update(users::table.find(user.id))
        .set(users::refresh_token.eq(&pair.refresh_token))
        .execute(&mut conn)
        .await?;

    let cookies = tokens.cookies(&pair);
    Ok(with_cookies(
        ApiResponse::ok(
            "User logged in successfully",
            SessionData { user, tokens: pair },
        ),
        cookies,
    ))
}

pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    tokens: web::Data<TokenService>,
    body: Option<web::Json<RefreshInput>>,
) -> Result<HttpResponse, ApiError> {
    let incoming = req
        .cookie(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| body.and_then(|b| non_blank(b.refresh_token.as_deref())))
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let claims = tokens.verify_refresh(&incoming)?;

    let mut conn = db::connection(&pool).await?;
    let user = users::table
        .find(claims.sub)
        .select(User::as_select())
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::unauthorized("Invalid RefreshToken"))?;

    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let pair = tokens.issue_pair(&user)?;
    diesel::update(users::table.find(user.id))
        .set(users::refresh_token.eq(&pair.refresh_token))
        .execute(&mut conn)
        .await?;

    let cookies = tokens.cookies(&pair);
    Ok(with_cookies(
        ApiResponse::ok("RefreshToken generated successfully", pair),
        cookies,
    ))
}

pub async fn logout(
    user: AuthUser,
    pool: web::Data<DbPool>,
    tokens: web::Data<TokenService>,
) -> Result<HttpResponse, ApiError> {
    store_refresh_token(&pool, user.id(), None).await?;
    Ok(with_cookies(
        ApiResponse::message("User logged out successfully"),
        tokens.removal_cookies(),
    ))
}

pub async fn change_password(
    user: AuthUser,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    body: web::Json<ChangePasswordInput>,
) -> Result<HttpResponse, ApiError> {
    let input = body.into_inner();
    let (old_password, new_password) = match (
        non_blank(input.old_password.as_deref()),
        non_blank(input.new_password.as_deref()),
    ) {
        (Some(old), Some(new)) => (old, new),
        _ => return Err(ApiError::bad_request("oldPassword and newPassword are required")),
    };
    if let Some(confirm) = input.confirm_password {
        if confirm.trim() != new_password {
            return Err(ApiError::bad_request(
                "new password and confirm password do not match",
            ));
        }
    }

    if !verify_password(old_password, user.0.password.clone()).await? {
        return Err(ApiError::bad_request("Old password is not correct"));
    }

    let hashed = hash_password(new_password, config.auth.bcrypt_cost).await?;
    let mut conn = db::connection(&pool).await?;
    diesel::update(users::table.find(user.id()))
        .set((
            users::password.eq(hashed),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .execute(&mut conn)
        .await?;

    Ok(ApiResponse::message("Password changed successfully").into_response())
}

pub async fn current_user(user: AuthUser) -> Result<HttpResponse, ApiError> {
    Ok(ApiResponse::ok("Current user fetched successfully", user.0).into_response())
}

pub async fn update_account(
    user: AuthUser,
    pool: web::Data<DbPool>,
    body: web::Json<UpdateAccountInput>,
) -> Result<HttpResponse, ApiError> {
    let input = body.into_inner();
    let changes = UserChanges {
        email: non_blank(input.email.as_deref()).map(|e| e.to_lowercase()),
        full_name: non_blank(input.full_name.as_deref()),
        user_name: non_blank(input.user_name.as_deref()).map(|u| u.to_lowercase()),
        updated_at: Some(chrono::Utc::now().naive_utc()),
    };
    if changes.email.is_none() && changes.full_name.is_none() && changes.user_name.is_none() {
        return Err(ApiError::bad_request(
            "At least one field is required to update",
        ));
    }
    if let Some(email) = &changes.email {
        if !email.validate_email() {
            return Err(ApiError::bad_request("email is invalid"));
        }
    }

    let mut conn = db::connection(&pool).await?;
    let updated = diesel::update(users::table.find(user.id()))
        .set(&changes)
        .returning(User::as_returning())
        .get_result(&mut conn)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict("Email or username is already taken".into()),
            other => other,
        })?;

    Ok(ApiResponse::ok("Account details updated successfully", updated).into_response())
}

/// Which profile image an upload replaces.
#[derive(Debug, Clone, Copy)]
enum ProfileImage {
    Avatar,
    Cover,
}

impl ProfileImage {
    fn field(&self) -> &'static str {
        match self {
            ProfileImage::Avatar => "avatar",
            ProfileImage::Cover => "coverImage",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProfileImage::Avatar => "Avatar image",
            ProfileImage::Cover => "Cover image",
        }
    }
}

async fn replace_profile_image(
    user: AuthUser,
    payload: Multipart,
    pool: &DbPool,
    media: &MediaClient,
    config: &AppConfig,
    image: ProfileImage,
) -> Result<HttpResponse, ApiError> {
    let mut form = MultipartForm::read(payload, &config.storage).await?;
    let file = form
        .take_file(image.field())
        .ok_or_else(|| ApiError::bad_request(format!("{} file is missing", image.label())))?;

    let asset = media.upload(file).await?;
    let saved = save_profile_image(pool, user.id(), image, &asset).await;

    match saved {
        Ok(updated) => {
            let previous = match image {
                ProfileImage::Avatar => user.0.avatar_public_id,
                ProfileImage::Cover => user.0.cover_image_public_id,
            };
            if let Some(previous) = previous {
                media.delete(&previous, ResourceType::Image).await;
            }
            Ok(ApiResponse::ok(format!("{} updated successfully", image.label()), updated)
                .into_response())
        }
        Err(e) => {
            media.discard(&[(&asset, ResourceType::Image)]).await;
            Err(e)
        }
    }
}

async fn save_profile_image(
    pool: &DbPool,
    user_id: Uuid,
    image: ProfileImage,
    asset: &UploadedAsset,
) -> Result<User, ApiError> {
    let mut conn = db::connection(pool).await?;
    let target = users::table.find(user_id);
    let user = match image {
        ProfileImage::Avatar => {
            diesel::update(target)
                .set((
                    users::avatar.eq(&asset.secure_url),
                    users::avatar_public_id.eq(Some(asset.public_id.as_str())),
                    users::updated_at.eq(diesel::dsl::now),
                ))
                .returning(User::as_returning())
                .get_result(&mut conn)
                .await?
        }
        ProfileImage::Cover => {
            diesel::update(target)
                .set((
                    users::cover_image.eq(&asset.secure_url),
                    users::cover_image_public_id.eq(Some(asset.public_id.as_str())),
                    users::updated_at.eq(diesel::dsl::now),
                ))
                .returning(User::as_returning())
                .get_result(&mut conn)
                .await?
        }
    };
    Ok(user)
}

pub async fn update_avatar(
    user: AuthUser,
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    replace_profile_image(user, payload, &pool, &media, &config, ProfileImage::Avatar).await
}

pub async fn update_cover_image(
    user: AuthUser,
    payload: Multipart,
    pool: web::Data<DbPool>,
    media: web::Data<MediaClient>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    replace_profile_image(user, payload, &pool, &media, &config, ProfileImage::Cover).await
}

pub async fn channel_profile(
    user: AuthUser,
    path: web::Path<String>,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let user_name = non_blank(Some(path.as_str()))
        .ok_or_else(|| ApiError::bad_request("Username is required to get channel profile"))?;

    let mut conn = db::connection(&pool).await?;
    let channel = read_model::channel_profile(&mut conn, &user_name, user.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))?;

    Ok(ApiResponse::ok("Channel fetched successfully", channel).into_response())
}

pub async fn watch_history(
    user: AuthUser,
    pool: web::Data<DbPool>,
) -> Result<HttpResponse, ApiError> {
    let mut conn = db::connection(&pool).await?;
    let history = read_model::watch_history(&mut conn, user.id()).await?;

    Ok(ApiResponse::ok(
        "Watch history fetched successfully",
        UserWithHistory {
            user: user.0,
            watch_history: history,
        },
    )
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;

    #[actix_web::test]
    async fn login_without_identifier_is_rejected_before_lookup() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/user/login")
            .set_json(serde_json::json!({ "password": "secret" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["message"], "email or username is required");
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn login_without_password_is_rejected() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/user/login")
            .set_json(serde_json::json!({ "email": "a@example.com", "password": "  " }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn malformed_json_uses_the_error_envelope() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/user/login")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["statusCode"], 400);
        assert!(body["data"].is_null());
    }

    #[actix_web::test]
    async fn refresh_without_token_is_unauthorized() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/user/refresh-token")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn refresh_with_forged_token_is_unauthorized() {
        let app = actix_test::init_service(test_app()).await;
        let req = actix_test::TestRequest::post()
            .uri("/api/v1/user/refresh-token")
            .set_json(serde_json::json!({ "refreshToken": "forged" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["message"], "Invalid RefreshToken");
    }

    #[actix_web::test]
    async fn account_routes_require_a_session() {
        let app = actix_test::init_service(test_app()).await;
        for (method, uri) in [
            ("GET", "/api/v1/user/current-user"),
            ("GET", "/api/v1/user/history"),
            ("POST", "/api/v1/user/logout"),
            ("PATCH", "/api/v1/user/update-account"),
            ("GET", "/api/v1/user/channel-profile/alice"),
        ] {
            let req = actix_test::TestRequest::default()
                .method(method.parse().unwrap())
                .uri(uri)
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[test]
    fn registration_is_normalized_and_validated() {
        let input = Registration {
            full_name: String::new(),
            user_name: "Alice".to_lowercase(),
            email: "bad".into(),
            password: "pw".into(),
        };
        let err: ApiError = input.validate().unwrap_err().into();
        match err {
            ApiError::Validation { errors, .. } => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "full_name"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn session_payload_flattens_tokens() {
        let data = SessionData {
            user: crate::services::auth::tests::test_user(),
            tokens: TokenPair {
                access_token: "a".into(),
                refresh_token: "r".into(),
            },
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert!(json["user"].get("password").is_none());
    }
}
