//! HTTP adapters for the generic resource operations, shared by every resource router.

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::db::query::Filter;
use crate::error::AppError;
use crate::middleware::request_time::RequestTime;
use crate::middleware::sanitize::CleanJson;
use crate::models::Resource;
use crate::services::query_builder::QueryParams;
use crate::services::resource_service;

pub fn list_response(records: Vec<Value>, time: RequestTime) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "success",
        "requestedAt": time.to_rfc3339(),
        "results": records.len(),
        "data": { "data": records },
    }))
}

pub fn single_response(record: Value) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "success",
        "data": { "data": record },
    }))
}

pub fn created_response(record: Value) -> HttpResponse {
    HttpResponse::Created().json(json!({
        "status": "success",
        "data": { "data": record },
    }))
}

/// List with the query string applied, narrowed by `scope`.
pub async fn list_scoped<R: Resource>(
    state: &AppState,
    params: &QueryParams,
    scope: Filter,
    time: RequestTime,
) -> Result<HttpResponse, AppError> {
    let records = resource_service::list::<R>(state.store.as_ref(), params, scope).await?;
    Ok(list_response(records, time))
}

pub async fn get_all<R: Resource>(
    state: web::Data<AppState>,
    req: HttpRequest,
    time: RequestTime,
) -> Result<HttpResponse, AppError> {
    let params = QueryParams::parse(req.query_string());
    list_scoped::<R>(&state, &params, Filter::new(), time).await
}

pub async fn get_one<R: Resource>(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let record = resource_service::get_one::<R>(state.store.as_ref(), &id).await?;
    Ok(single_response(record))
}

pub async fn create_one<R: Resource>(
    state: web::Data<AppState>,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let store = state.store.as_ref();
    let record: R =
        resource_service::create(store, body.into_inner(), &state.settings.save_options()).await?;
    Ok(created_response(resource_service::present(store, &record).await?))
}

pub async fn update_one<R: Resource>(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: CleanJson,
) -> Result<HttpResponse, AppError> {
    let store = state.store.as_ref();
    let record: R = resource_service::update(
        store,
        &id,
        body.into_inner(),
        &state.settings.save_options(),
    )
    .await?;
    Ok(single_response(resource_service::present(store, &record).await?))
}

pub async fn delete_one<R: Resource>(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    resource_service::delete::<R>(state.store.as_ref(), &id).await?;
    Ok(HttpResponse::NoContent().finish())
}
