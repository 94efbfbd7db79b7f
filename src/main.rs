use std::sync::Arc;

use actix_web::{web, HttpServer};
use env_logger::Env;

use tours_api::app::{build_app, AppState};
use tours_api::config::Settings;
use tours_api::db::{MemoryStore, MongoStore, Store};
use tours_api::models::UNIQUE_INDEXES;

async fn open_store(settings: &Settings) -> std::io::Result<Store> {
    match &settings.mongodb_uri {
        Some(uri) => {
            let store = MongoStore::connect(uri, &settings.database_name)
                .await
                .map_err(std::io::Error::other)?;
            if let Err(e) = store.ensure_indexes(UNIQUE_INDEXES).await {
                log::warn!("Could not create unique indexes: {e}");
            }
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("MONGODB_URI is not set, using the in-memory store");
            Ok(Arc::new(MemoryStore::with_unique_indexes(UNIQUE_INDEXES)))
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let settings = Settings::from_env().map_err(std::io::Error::other)?;
    let store = open_store(&settings).await?;

    let address = settings.bind_address();
    let state = web::Data::new(AppState::new(store, settings));

    log::info!("Starting HTTP server on {}:{}", address.0, address.1);
    HttpServer::new(move || build_app(state.clone()))
        .bind(address)?
        .run()
        .await
}
