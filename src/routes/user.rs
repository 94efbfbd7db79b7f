use actix_web::{http::StatusCode, web, HttpResponse};
use bson::Document;
use serde_json::json;

use crate::app::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthMiddleware;
use crate::middleware::auth_context::AuthenticatedUser;
use crate::middleware::role_auth::RequireRole;
use crate::middleware::sanitize::CleanJson;
use crate::models::{Role, User};
use crate::routes::factory;
use crate::services::{auth_service, resource_service};

const ADMINS: &[Role] = &[Role::Admin];

fn text<'a>(body: &'a Document, key: &str) -> Option<&'a str> {
    body.get_str(key).ok()
}

fn owned_text(body: &Document, key: &str) -> String {
    text(body, key).unwrap_or_default().to_string()
}

/// Signs a session token for `user` and sends it with the user's public fields.
async fn send_token(
    state: &AppState,
    user: &User,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let token = auth_service::generate_token(&state.settings.auth, user)?;
    let user = resource_service::present(state.store.as_ref(), user).await?;
    Ok(HttpResponse::build(status).json(json!({
        "status": "success",
        "token": token,
        "data": { "user": user },
    })))
}

pub async fn signup(
    state: web::Data<AppState>,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let user = auth_service::signup(
        state.store.as_ref(),
        body.into_inner(),
        &state.settings.save_options(),
    )
    .await?;
    send_token(&state, &user, StatusCode::CREATED).await
}

pub async fn login(state: web::Data<AppState>, body: CleanJson) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let user = auth_service::login(
        state.store.as_ref(),
        text(&body, "email"),
        text(&body, "password"),
    )
    .await?;
    send_token(&state, &user, StatusCode::OK).await
}

/// Issues a reset token. With no mail delivery configured the token is returned to the caller.
pub async fn forgot_password(
    state: web::Data<AppState>,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let email = text(&body, "email").ok_or_else(|| {
        AppError::BadRequest("Please provide your email address.".to_string())
    })?;
    let token = auth_service::forgot_password(state.store.as_ref(), email).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Token issued. It is valid for 10 minutes.",
        "resetToken": token,
    })))
}

pub async fn reset_password(
    state: web::Data<AppState>,
    token: web::Path<String>,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let user = auth_service::reset_password(
        state.store.as_ref(),
        &token,
        owned_text(&body, "password"),
        owned_text(&body, "passwordConfirm"),
        &state.settings.save_options(),
    )
    .await?;
    send_token(&state, &user, StatusCode::OK).await
}

pub async fn update_my_password(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let user = auth_service::update_password(
        state.store.as_ref(),
        user.into_inner(),
        text(&body, "passwordCurrent").unwrap_or_default(),
        owned_text(&body, "password"),
        owned_text(&body, "passwordConfirm"),
        &state.settings.save_options(),
    )
    .await?;
    send_token(&state, &user, StatusCode::OK).await
}

pub async fn get_me(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let id = user.0.id.ok_or_else(AppError::not_found)?;
    let record = resource_service::get_one::<User>(state.store.as_ref(), &id.to_hex()).await?;
    Ok(factory::single_response(record))
}

pub async fn update_me(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let store = state.store.as_ref();
    let updated = auth_service::update_me(
        store,
        &user.0,
        body.into_inner(),
        &state.settings.save_options(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": { "user": resource_service::present(store, &updated).await? },
    })))
}

pub async fn delete_me(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    auth_service::delete_me(state.store.as_ref(), &user.0).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login))
            .route("/forgotPassword", web::post().to(forgot_password))
            .route("/resetPassword/{token}", web::patch().to(reset_password))
            .service(
                web::scope("")
                    .wrap(AuthMiddleware)
                    .route("/updateMyPassword", web::patch().to(update_my_password))
                    .route("/me", web::get().to(get_me))
                    .route("/updateMe", web::patch().to(update_me))
                    .route("/deleteMe", web::delete().to(delete_me))
                    .service(
                        web::scope("")
                            .wrap(RequireRole::new(ADMINS))
                            .route("", web::get().to(factory::get_all::<User>))
                            .route("/{id}", web::get().to(factory::get_one::<User>))
                            .route("/{id}", web::patch().to(factory::update_one::<User>))
                            .route("/{id}", web::delete().to(factory::delete_one::<User>)),
                    ),
            ),
    );
}
