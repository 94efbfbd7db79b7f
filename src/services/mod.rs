pub mod auth_service;
pub mod query_builder;
pub mod resource_service;
pub mod tour_stats;
pub mod validation;
