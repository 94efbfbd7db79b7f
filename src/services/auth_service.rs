use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::AuthSettings;
use crate::db::query::Filter;
use crate::db::{Changes, DocumentStore};
use crate::error::AppError;
use crate::middleware::auth::Claims;
use crate::models::resource::SaveOptions;
use crate::models::user::{User, USERS};
use crate::services::resource_service;

const RESET_TOKEN_BYTES: usize = 32;
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// Fields a user may change about themselves through `updateMe`.
pub const SELF_EDITABLE_FIELDS: &[&str] = &["name", "email", "photo"];

const SIGNUP_FIELDS: &[&str] = &["name", "email", "photo", "password", "passwordConfirm"];

pub fn hash_password(plain: &str, cost: u32) -> Result<String, AppError> {
    bcrypt::hash(plain, cost).map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// A password reset token: `plain` goes to the user, `digest` is stored.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plain: String,
    pub digest: String,
    pub expires_at: DateTime,
}

pub fn digest_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

pub fn create_password_reset_token() -> ResetToken {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plain = hex::encode(bytes);
    let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

    ResetToken {
        digest: digest_token(&plain),
        plain,
        expires_at: DateTime::from_chrono(expires_at),
    }
}

pub fn generate_token(settings: &AuthSettings, user: &User) -> Result<String, AppError> {
    let user_id = user
        .id
        .ok_or_else(|| AppError::Internal("cannot sign a token for an unsaved user".to_string()))?;
    let now = Utc::now();

    let claims = Claims {
        sub: user.email.clone(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::days(settings.jwt_ttl_days)).timestamp() as usize,
        user_id: user_id.to_hex(),
    };

    let header = Header::new(Algorithm::HS256);
    encode(
        &header,
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token generation failed: {e}")))
}

pub fn decode_token(settings: &AuthSettings, token: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp", "iat", "sub", "user_id"]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Your token has expired! Please log in again.".to_string())
        }
        _ => AppError::Unauthorized("Invalid token. Please log in again!".to_string()),
    })
}

/// Live user a token was issued for, provided the password has not changed since.
pub async fn find_token_user(store: &dyn DocumentStore, claims: &Claims) -> Result<User, AppError> {
    let gone = || {
        AppError::Unauthorized("The user belonging to this token does no longer exist.".to_string())
    };
    let id = ObjectId::parse_str(&claims.user_id).map_err(|_| gone())?;
    let user = resource_service::find_live::<User>(store, Filter::id(id))
        .await?
        .ok_or_else(gone)?;

    if user.changed_password_after(claims.iat as i64) {
        return Err(AppError::Unauthorized(
            "User recently changed password! Please log in again.".to_string(),
        ));
    }
    Ok(user)
}

async fn find_by_email(store: &dyn DocumentStore, email: &str) -> Result<Option<User>, AppError> {
    resource_service::find_live::<User>(
        store,
        Filter::new().eq("email", email.trim().to_lowercase()),
    )
    .await
}

/// Creates a `user`-role account from the signup fields of `payload`.
pub async fn signup(
    store: &dyn DocumentStore,
    payload: Document,
    options: &SaveOptions,
) -> Result<User, AppError> {
    let payload: Document = payload
        .into_iter()
        .filter(|(key, _)| SIGNUP_FIELDS.contains(&key.as_str()))
        .collect();
    let user: User = resource_service::create(store, payload, options).await?;
    log::info!("New user signed up: {}", user.email);
    Ok(user)
}

pub async fn login(
    store: &dyn DocumentStore,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<User, AppError> {
    let (Some(email), Some(password)) = (
        email.filter(|e| !e.trim().is_empty()),
        password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Please provide email and password!".to_string(),
        ));
    };

    match find_by_email(store, email).await? {
        Some(user) if verify_password(password, &user.password) => Ok(user),
        _ => Err(AppError::Unauthorized(
            "Incorrect email or password".to_string(),
        )),
    }
}

/// Issues a reset token for the account and returns the plaintext token.
pub async fn forgot_password(store: &dyn DocumentStore, email: &str) -> Result<String, AppError> {
    let user = find_by_email(store, email).await?.ok_or_else(|| {
        AppError::NotFound("There is no user with that email address.".to_string())
    })?;
    let id = user
        .id
        .ok_or_else(|| AppError::Internal("stored user has no _id".to_string()))?;

    let token = create_password_reset_token();
    let changes = Changes::set(doc! {
        "passwordResetToken": token.digest.clone(),
        "passwordResetExpires": token.expires_at,
    });
    store
        .update_by_id(USERS, id, &User::live(), &changes)
        .await?;
    log::info!("Password reset requested for {}", user.email);

    Ok(token.plain)
}

/// Sets a new password for the holder of an unexpired reset token. The token is consumed.
pub async fn reset_password(
    store: &dyn DocumentStore,
    token: &str,
    password: String,
    password_confirm: String,
    options: &SaveOptions,
) -> Result<User, AppError> {
    let filter = Filter::new()
        .eq("passwordResetToken", digest_token(token))
        .gt("passwordResetExpires", DateTime::now());
    let mut user = resource_service::find_live::<User>(store, filter)
        .await?
        .ok_or(AppError::ExpiredOrInvalid)?;

    user.password = password;
    user.password_confirm = Some(password_confirm);
    user.password_reset_token = None;
    user.password_reset_expires = None;

    resource_service::save_existing(
        store,
        user,
        &["password", "passwordConfirm", "passwordResetToken", "passwordResetExpires"],
        options,
    )
    .await
}

pub async fn update_password(
    store: &dyn DocumentStore,
    mut user: User,
    current: &str,
    password: String,
    password_confirm: String,
    options: &SaveOptions,
) -> Result<User, AppError> {
    if !verify_password(current, &user.password) {
        return Err(AppError::Unauthorized(
            "Your current password is wrong.".to_string(),
        ));
    }

    user.password = password;
    user.password_confirm = Some(password_confirm);
    resource_service::save_existing(store, user, &["password", "passwordConfirm"], options).await
}

/// Applies the self-editable fields of `payload` to the user's own record.
pub async fn update_me(
    store: &dyn DocumentStore,
    user: &User,
    payload: Document,
    options: &SaveOptions,
) -> Result<User, AppError> {
    if payload.contains_key("password") || payload.contains_key("passwordConfirm") {
        return Err(AppError::BadRequest(
            "This route is not for password updates. Please use /updateMyPassword.".to_string(),
        ));
    }
    let id = user
        .id
        .ok_or_else(|| AppError::Internal("stored user has no _id".to_string()))?;

    let patch: Document = payload
        .into_iter()
        .filter(|(key, _)| SELF_EDITABLE_FIELDS.contains(&key.as_str()))
        .collect();
    resource_service::update(store, &id.to_hex(), patch, options).await
}

pub async fn delete_me(store: &dyn DocumentStore, user: &User) -> Result<(), AppError> {
    let id = user
        .id
        .ok_or_else(|| AppError::Internal("stored user has no _id".to_string()))?;
    resource_service::delete::<User>(store, &id.to_hex()).await
}
