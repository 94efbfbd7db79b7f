use actix_web::{guard, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::app::AppState;
use crate::db::query::Filter;
use crate::error::AppError;
use crate::middleware::auth::AuthMiddleware;
use crate::middleware::request_time::RequestTime;
use crate::middleware::role_auth::RequireRole;
use crate::models::{Role, Tour};
use crate::routes::{factory, review};
use crate::services::query_builder::QueryParams;
use crate::services::tour_stats;

const TOUR_EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];
const TOUR_PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

/// The five best rated tours, cheapest first among equals.
pub async fn top_five_cheap(
    state: web::Data<AppState>,
    req: HttpRequest,
    time: RequestTime,
) -> Result<HttpResponse, AppError> {
    let mut params = QueryParams::parse(req.query_string());
    params.set("limit", "5");
    params.set("sort", "-ratingsAverage,price");
    params.set("fields", "name,price,ratingsAverage,summary,difficulty");
    factory::list_scoped::<Tour>(&state, &params, Filter::new(), time).await
}

pub async fn get_tour_stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let stats = tour_stats::tour_stats(state.store.as_ref(), &state.settings.stats).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": { "stats": stats },
    })))
}

pub async fn get_monthly_plan(
    state: web::Data<AppState>,
    year: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let year = tour_stats::parse_year(&year)?;
    let plan = tour_stats::monthly_plan(state.store.as_ref(), year).await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "results": plan.len(),
        "data": { "plan": plan },
    })))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tours")
            .service(web::scope("/{tour_id}/reviews").configure(review::nested_config))
            .route("/top-5-cheap", web::get().to(top_five_cheap))
            .route("/tour-stats", web::get().to(get_tour_stats))
            .service(
                web::resource("/monthly-plan/{year}")
                    .wrap(RequireRole::new(TOUR_PLANNERS))
                    .wrap(AuthMiddleware)
                    .route(web::get().to(get_monthly_plan)),
            )
            .service(
                web::resource("")
                    .guard(guard::Get())
                    .to(factory::get_all::<Tour>),
            )
            .service(
                web::resource("")
                    .guard(guard::Post())
                    .wrap(RequireRole::new(TOUR_EDITORS))
                    .wrap(AuthMiddleware)
                    .to(factory::create_one::<Tour>),
            )
            .service(
                web::resource("/{id}")
                    .guard(guard::Get())
                    .to(factory::get_one::<Tour>),
            )
            .service(
                web::resource("/{id}")
                    .guard(guard::Any(guard::Patch()).or(guard::Delete()))
                    .wrap(RequireRole::new(TOUR_EDITORS))
                    .wrap(AuthMiddleware)
                    .route(web::patch().to(factory::update_one::<Tour>))
                    .route(web::delete().to(factory::delete_one::<Tour>)),
            ),
    );
}
