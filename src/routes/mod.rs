use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::AppError;

pub mod factory;
pub mod health;
pub mod review;
pub mod tour;
pub mod user;

/// Resource routers mounted under `/api/v1`.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .configure(tour::config)
            .configure(user::config)
            .configure(review::config),
    );
}

pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!(
        "Can't find {} on this server!",
        req.path()
    )))
}
