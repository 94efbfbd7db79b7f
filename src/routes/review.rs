use actix_web::{guard, web, HttpRequest, HttpResponse};

use crate::app::AppState;
use crate::db::query::Filter;
use crate::error::AppError;
use crate::middleware::auth::AuthMiddleware;
use crate::middleware::auth_context::AuthenticatedUser;
use crate::middleware::request_time::RequestTime;
use crate::middleware::role_auth::RequireRole;
use crate::middleware::sanitize::CleanJson;
use crate::models::{Review, Role};
use crate::routes::factory;
use crate::services::query_builder::QueryParams;
use crate::services::resource_service;

const REVIEWERS: &[Role] = &[Role::User];
const REVIEW_EDITORS: &[Role] = &[Role::User, Role::Admin];

/// Reviews of the tour in the path.
pub async fn list_tour_reviews(
    state: web::Data<AppState>,
    tour_id: web::Path<String>,
    req: HttpRequest,
    time: RequestTime,
) -> Result<HttpResponse, AppError> {
    let tour = resource_service::parse_id(&tour_id)?;
    let params = QueryParams::parse(req.query_string());
    factory::list_scoped::<Review>(&state, &params, Filter::new().eq("tour", tour), time).await
}

/// Creates a review. `tour` defaults to the tour in the path and `user` to the caller.
pub async fn create_review(
    state: web::Data<AppState>,
    tour_id: Option<web::Path<String>>,
    user: AuthenticatedUser,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let mut payload = body.into_inner();
    if !payload.contains_key("tour") {
        if let Some(tour_id) = tour_id {
            payload.insert("tour", resource_service::parse_id(&tour_id)?);
        }
    }
    if !payload.contains_key("user") {
        if let Some(id) = user.0.id {
            payload.insert("user", id);
        }
    }

    let store = state.store.as_ref();
    let review: Review =
        resource_service::create(store, payload, &state.settings.save_options()).await?;
    Ok(factory::created_response(
        resource_service::present(store, &review).await?,
    ))
}

/// Routes mounted under `/tours/{tour_id}/reviews`.
pub fn nested_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .guard(guard::Get())
            .to(list_tour_reviews),
    )
    .service(
        web::resource("")
            .guard(guard::Post())
            .wrap(RequireRole::new(REVIEWERS))
            .wrap(AuthMiddleware)
            .to(create_review),
    );
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reviews")
            .service(
                web::resource("")
                    .guard(guard::Get())
                    .to(factory::get_all::<Review>),
            )
            .service(
                web::resource("")
                    .guard(guard::Post())
                    .wrap(RequireRole::new(REVIEWERS))
                    .wrap(AuthMiddleware)
                    .to(create_review),
            )
            .service(
                web::resource("/{id}")
                    .guard(guard::Get())
                    .to(factory::get_one::<Review>),
            )
            .service(
                web::resource("/{id}")
                    .guard(guard::Any(guard::Patch()).or(guard::Delete()))
                    .wrap(RequireRole::new(REVIEW_EDITORS))
                    .wrap(AuthMiddleware)
                    .route(web::patch().to(factory::update_one::<Review>))
                    .route(web::delete().to(factory::delete_one::<Review>)),
            ),
    );
}
