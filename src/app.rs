use actix_cors::Cors;
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    middleware::{from_fn, Logger},
    web, App, Error,
};

use crate::config::Settings;
use crate::db::Store;
use crate::error::AppError;
use crate::middleware::rate_limit::RateLimit;
use crate::middleware::request_time::stamp_request_time;
use crate::middleware::security_headers::security_headers;
use crate::routes::{self, health};

/// Largest accepted JSON body.
pub const JSON_LIMIT_BYTES: usize = 10 * 1024;

/// Shared by every worker.
pub struct AppState {
    pub store: Store,
    pub settings: Settings,
    pub rate_limit: RateLimit,
}

impl AppState {
    pub fn new(store: Store, settings: Settings) -> Self {
        let rate_limit = RateLimit::new(&settings.rate_limit);
        AppState {
            store,
            settings,
            rate_limit,
        }
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT_BYTES)
        .error_handler(|err, req| {
            log::debug!("Rejected JSON body on {}: {err}", req.path());
            AppError::BadRequest(format!("Invalid JSON body: {err}")).into()
        })
}

fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

pub fn build_app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let rate_limit = state.rate_limit.clone();

    App::new()
        .app_data(state)
        .app_data(json_config())
        .wrap(from_fn(stamp_request_time))
        .wrap(security_headers())
        .wrap(cors())
        .wrap(Logger::default())
        .route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/api")
                .wrap(rate_limit)
                .configure(routes::config),
        )
        .default_service(web::to(routes::not_found))
}
