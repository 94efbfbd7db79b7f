use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
struct HealthStatus {
    status: String,
    services: HashMap<String, ServiceStatus>,
    version: String,
}

#[derive(Serialize, Clone)]
struct ServiceStatus {
    status: String,
    details: Option<String>,
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let store_result = check_store(&state).await;
    let status = if store_result.status == "ok" {
        "ok"
    } else {
        "degraded"
    };

    let mut services = HashMap::new();
    services.insert("database".to_string(), store_result);

    HttpResponse::Ok().json(HealthStatus {
        status: status.to_string(),
        services,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn check_store(state: &AppState) -> ServiceStatus {
    match state.store.ping().await {
        Ok(()) => ServiceStatus {
            status: "ok".to_string(),
            details: Some(format!("Connected to database {}", state.settings.database_name)),
        },
        Err(e) => {
            log::error!("Database health check failed: {e}");
            ServiceStatus {
                status: "error".to_string(),
                details: Some(format!("Failed to connect: {e}")),
            }
        }
    }
}
